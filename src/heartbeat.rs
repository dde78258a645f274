use crate::error::{DoorbellError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::gpio::{GpioLine, Level};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPhase {
    Idle,
    Running,
    /// Terminal
    Cancelled,
}

/// Level of the heartbeat line as last written by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    pub phase: HeartbeatPhase,
    pub level: Level,
    pub ticks: u64,
}

/// Periodic, cancellable toggle task for the status LED.
///
/// Ticks run on the runtime that called [`HeartbeatScheduler::start`]. A tick
/// and [`HeartbeatScheduler::cancel`] serialize on the same lock, so once
/// `cancel` returns no further toggle can happen.
pub struct HeartbeatScheduler {
    interval: Duration,
    state: Arc<Mutex<HeartbeatState>>,
    cancellation_token: CancellationToken,
    task: Option<JoinHandle<()>>,
    event_bus: Option<Arc<EventBus>>,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(HeartbeatState {
                phase: HeartbeatPhase::Idle,
                level: Level::Low,
                ticks: 0,
            })),
            cancellation_token: CancellationToken::new(),
            task: None,
            event_bus: None,
        }
    }

    /// Publish a `HeartbeatToggled` event on every tick
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn phase(&self) -> HeartbeatPhase {
        self.state.lock().phase
    }

    pub fn snapshot(&self) -> HeartbeatState {
        *self.state.lock()
    }

    /// Begin toggling `line`, whose current level is `initial`. The first
    /// toggle happens immediately, then once per interval.
    pub fn start(&mut self, line: Arc<GpioLine>, initial: Level) -> Result<()> {
        if self.interval.is_zero() {
            return Err(DoorbellError::component(
                "heartbeat",
                "interval must be greater than zero",
            ));
        }

        {
            let mut state = self.state.lock();
            match state.phase {
                HeartbeatPhase::Idle => {
                    state.phase = HeartbeatPhase::Running;
                    state.level = initial;
                }
                HeartbeatPhase::Running => {
                    return Err(DoorbellError::component("heartbeat", "already running"));
                }
                HeartbeatPhase::Cancelled => {
                    return Err(DoorbellError::component("heartbeat", "already cancelled"));
                }
            }
        }

        info!(
            "Starting heartbeat on {} every {:?}",
            line.name(),
            self.interval
        );

        let state = Arc::clone(&self.state);
        let token = self.cancellation_token.clone();
        let event_bus = self.event_bus.clone();
        let interval = self.interval;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !Self::tick(&state, &line, event_bus.as_deref()) {
                    break;
                }
            }

            debug!("Heartbeat task exited");
        }));

        Ok(())
    }

    /// Toggle once. Returns `false` when no further ticks should be scheduled.
    fn tick(state: &Mutex<HeartbeatState>, line: &GpioLine, event_bus: Option<&EventBus>) -> bool {
        let mut state = state.lock();
        if state.phase != HeartbeatPhase::Running {
            return false;
        }

        let next = state.level.toggled();
        match line.write_if_open(next) {
            Ok(true) => {
                state.level = next;
                state.ticks += 1;
                if let Some(bus) = event_bus {
                    bus.publish(SystemEvent::HeartbeatToggled { level: next });
                }
                true
            }
            Ok(false) => {
                debug!("Heartbeat line {} already released; stopping", line.name());
                false
            }
            Err(e) => {
                // Line stays at its last written level; try again next tick
                error!("Error on peripheral I/O while toggling heartbeat: {}", e);
                true
            }
        }
    }

    /// Stop scheduling ticks. An in-flight tick completes first; after this
    /// returns the line is never toggled again.
    pub fn cancel(&mut self) {
        {
            let mut state = self.state.lock();
            if state.phase == HeartbeatPhase::Cancelled {
                return;
            }
            state.phase = HeartbeatPhase::Cancelled;
        }
        self.cancellation_token.cancel();
        info!("Heartbeat cancelled");
    }

    /// Wait for the tick task to exit after [`HeartbeatScheduler::cancel`]
    pub async fn join(&mut self, timeout: Duration) {
        if let Some(task) = self.task.take() {
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => debug!("Heartbeat task joined"),
                Ok(Err(e)) => error!("Heartbeat task failed: {}", e),
                Err(_) => warn!("Heartbeat task did not exit within {:?}", timeout),
            }
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
