use super::orchestrator::StageResult;
use super::types::{CycleOutcome, CycleStage, CycleState};
use super::{DoorbellOrchestrator, ShutdownHandle, ShutdownReason};
use crate::button::ButtonEvent;
use crate::encode::encode_jpeg;
use crate::error::{CaptureError, DoorbellError, Result};
use crate::events::SystemEvent;
use crate::frame::{AnnotationResult, DoorbellEvent, ImageBuffer};
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::signal;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

impl DoorbellOrchestrator {
    /// Run the main application loop with signal handling, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        if !self.started {
            return Err(DoorbellError::system("Doorbell system not started"));
        }
        info!("Doorbell system is running");

        self.setup_signal_handlers();

        let reason = self.run_loop().await;
        info!("Shutdown initiated: {}", reason);
        self.event_bus.publish(SystemEvent::ShutdownRequested {
            reason: reason.to_string(),
        });

        let exit_code = self.shutdown().await?;
        info!("Doorbell system shutdown complete");
        Ok(exit_code)
    }

    /// The main/event domain: button sampling, stage results and the capture
    /// timeout, one at a time. Returns when shutdown is requested.
    pub async fn run_loop(&mut self) -> ShutdownReason {
        let mut poll = tokio::time::interval(self.config.gpio.button_poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.state.capture_deadline();

            tokio::select! {
                biased;
                reason = self.shutdown_rx.recv() => {
                    return reason.unwrap_or_else(|| {
                        ShutdownReason::Error("shutdown channel closed".to_string())
                    });
                }
                Some(result) = self.stage_rx.recv() => self.handle_stage_result(result),
                _ = wait_for_deadline(deadline) => self.handle_capture_timeout(),
                _ = poll.tick() => self.poll_button(),
            }
        }
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let handle = self.shutdown_handle();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            handle.request(ShutdownReason::Signal("SIGTERM".to_string()));
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let handle: ShutdownHandle = self.shutdown_handle();
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                handle.request(ShutdownReason::Signal("SIGINT".to_string()));
            }
        });
    }

    fn poll_button(&mut self) {
        let Some(button) = self.button.as_mut() else {
            return;
        };

        match button.poll() {
            Some(ButtonEvent::Pressed) => {
                info!("Doorbell button pressed");
                self.event_bus.publish(SystemEvent::ButtonPressed {
                    timestamp: SystemTime::now(),
                });
                // Rejections are logged inside
                let _ = self.request_capture();
            }
            Some(ButtonEvent::Released) => {
                debug!("Doorbell button released");
                self.event_bus.publish(SystemEvent::ButtonReleased {
                    timestamp: SystemTime::now(),
                });
            }
            None => {}
        }
    }

    /// Start a capture cycle. Fails with [`CaptureError::Busy`] while a cycle
    /// is active, leaving that cycle untouched.
    pub fn request_capture(&mut self) -> std::result::Result<u64, CaptureError> {
        if !self.state.is_idle() {
            let state = self.state.cycle();
            warn!(
                "Press ignored: capture cycle {:?} still in {:?}",
                self.state.active_cycle(),
                state
            );
            self.state.note_press_ignored();
            self.event_bus.publish(SystemEvent::PressIgnored { state });
            return Err(CaptureError::Busy);
        }

        let cycle_id = self.state.begin_cycle()?;
        self.announce_transition(cycle_id, CycleState::Idle, CycleState::Triggering);

        if let Err(e) = self.collaborators.capture.trigger(cycle_id) {
            self.fail_cycle(cycle_id, CycleStage::Capture, e.to_string());
            return Err(e);
        }

        self.advance(cycle_id);
        let deadline = self
            .config
            .camera
            .capture_timeout()
            .map(|timeout| Instant::now() + timeout);
        self.state.set_capture_deadline(deadline);
        Ok(cycle_id)
    }

    pub(super) fn handle_stage_result(&mut self, result: StageResult) {
        match result {
            StageResult::Captured(outcome) => {
                let cycle_id = outcome.cycle_id;
                if !self.state.is_current(cycle_id, CycleState::AwaitingImage) {
                    debug!("Ignoring capture result for inactive cycle {}", cycle_id);
                    return;
                }
                self.state.set_capture_deadline(None);

                match outcome.result {
                    Ok(image) => {
                        info!("Image captured for cycle {} ({} bytes)", cycle_id, image.len());
                        self.event_bus.publish(SystemEvent::ImageCaptured {
                            cycle_id,
                            bytes: image.len(),
                        });
                        self.advance(cycle_id);
                        self.dispatch_encode(cycle_id, image);
                    }
                    Err(e) => self.fail_cycle(cycle_id, CycleStage::Capture, e.to_string()),
                }
            }
            StageResult::Encoded { cycle_id, result } => {
                if !self.state.is_current(cycle_id, CycleState::Encoding) {
                    debug!("Ignoring encode result for inactive cycle {}", cycle_id);
                    return;
                }
                match result {
                    Ok(jpeg) => {
                        self.advance(cycle_id);
                        self.dispatch_annotate(cycle_id, jpeg);
                    }
                    Err(e) => self.fail_cycle(cycle_id, CycleStage::Encoding, e.to_string()),
                }
            }
            StageResult::Annotated {
                cycle_id,
                image,
                result,
            } => {
                if !self.state.is_current(cycle_id, CycleState::Annotating) {
                    debug!("Ignoring annotation result for inactive cycle {}", cycle_id);
                    return;
                }
                match result {
                    Ok(annotations) => {
                        self.event_bus.publish(SystemEvent::AnnotationCompleted {
                            cycle_id,
                            labels: annotations.ranked(),
                        });
                        self.advance(cycle_id);
                        self.dispatch_publish(cycle_id, image, annotations);
                    }
                    Err(e) => self.fail_cycle(cycle_id, CycleStage::Annotation, e.to_string()),
                }
            }
            StageResult::Published {
                cycle_id,
                event_id,
                result,
            } => {
                if !self.state.is_current(cycle_id, CycleState::Publishing) {
                    debug!("Ignoring publish result for inactive cycle {}", cycle_id);
                    return;
                }
                match result {
                    Ok(()) => {
                        self.event_bus.publish(SystemEvent::EventPublished {
                            cycle_id,
                            event_id: event_id.to_string(),
                        });
                        if let Some(from) = self.state.finish(cycle_id, CycleOutcome::Success) {
                            info!("Capture cycle {} completed", cycle_id);
                            self.announce_transition(cycle_id, from, CycleState::Idle);
                        }
                    }
                    Err(e) => self.fail_cycle(cycle_id, CycleStage::Publish, e.to_string()),
                }
            }
        }
    }

    pub(super) fn handle_capture_timeout(&mut self) {
        self.state.set_capture_deadline(None);
        let Some(cycle_id) = self.state.active_cycle() else {
            return;
        };
        if !self.state.is_current(cycle_id, CycleState::AwaitingImage) {
            return;
        }

        self.collaborators.capture.abandon(cycle_id);
        let seconds = self.config.camera.capture_timeout_seconds;
        self.fail_cycle(
            cycle_id,
            CycleStage::Capture,
            CaptureError::Timeout { seconds }.to_string(),
        );
    }

    /// Encode on the I/O domain and hand the JPEG to the preview, if any
    fn dispatch_encode(&mut self, cycle_id: u64, image: ImageBuffer) {
        let stage_tx = self.stage_tx.clone();
        let quality = self.config.encoding.jpeg_quality;
        let preview = self.preview.clone();

        let posted = self.post_io(async move {
            let result = encode_jpeg(&image, quality);
            if let (Ok(jpeg), Some(preview)) = (&result, &preview) {
                // Preview trouble never affects the cycle
                let _ = preview.show(jpeg).await;
            }
            let _ = stage_tx.send(StageResult::Encoded { cycle_id, result });
        });

        if let Err(e) = posted {
            self.fail_cycle(cycle_id, CycleStage::Encoding, e.to_string());
        }
    }

    fn dispatch_annotate(&mut self, cycle_id: u64, image: ImageBuffer) {
        let stage_tx = self.stage_tx.clone();
        let annotator = Arc::clone(&self.collaborators.annotator);

        let posted = self.post_network(async move {
            let result = annotator.annotate(&image).await;
            let _ = stage_tx.send(StageResult::Annotated {
                cycle_id,
                image,
                result,
            });
        });

        if let Err(e) = posted {
            self.fail_cycle(cycle_id, CycleStage::Annotation, e.to_string());
        }
    }

    fn dispatch_publish(&mut self, cycle_id: u64, image: ImageBuffer, annotations: AnnotationResult) {
        let stage_tx = self.stage_tx.clone();
        let publisher = Arc::clone(&self.collaborators.publisher);
        let event = DoorbellEvent::new(image, annotations);
        let event_id = event.id();

        let posted = self.post_network(async move {
            let result = publisher.publish(&event).await;
            let _ = stage_tx.send(StageResult::Published {
                cycle_id,
                event_id,
                result,
            });
        });

        if let Err(e) = posted {
            self.fail_cycle(cycle_id, CycleStage::Publish, e.to_string());
        }
    }

    fn post_io<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.io_domain {
            Some(domain) => domain.post(work),
            None => Err(DoorbellError::system("I/O domain not running")),
        }
    }

    fn post_network<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.network_domain {
            Some(domain) => domain.post(work),
            None => Err(DoorbellError::system("network domain not running")),
        }
    }

    fn advance(&mut self, cycle_id: u64) {
        if let Some(from) = self.state.advance(cycle_id) {
            self.announce_transition(cycle_id, from, self.state.cycle());
        }
    }

    fn fail_cycle(&mut self, cycle_id: u64, stage: CycleStage, error: String) {
        error!("Capture cycle {} failed during {:?}: {}", cycle_id, stage, error);
        self.event_bus.publish(SystemEvent::CycleFailed {
            cycle_id,
            stage,
            error,
        });
        if let Some(from) = self.state.finish(cycle_id, CycleOutcome::Failed) {
            self.announce_transition(cycle_id, from, CycleState::Idle);
        }
    }

    fn announce_transition(&self, cycle_id: u64, from: CycleState, to: CycleState) {
        debug!("Cycle {}: {:?} -> {:?}", cycle_id, from, to);
        self.event_bus
            .publish(SystemEvent::CycleStateChanged { cycle_id, from, to });
    }
}
