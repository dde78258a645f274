use super::watcher::{ButtonEvent, ButtonWatcher, WatcherStats};
use crate::error::PeripheralError;
use crate::gpio::{Direction, GpioLine, PeripheralDriver, Polarity};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Doorbell button: an input line plus its transition watcher.
///
/// Read errors are reported once per run of consecutive failures and never
/// stop polling.
pub struct ButtonInput {
    line: GpioLine,
    watcher: ButtonWatcher,
    read_error_streak: u32,
}

impl ButtonInput {
    pub fn open(
        driver: Arc<dyn PeripheralDriver>,
        name: &str,
        polarity: Polarity,
    ) -> Result<Self, PeripheralError> {
        let line = GpioLine::open(driver, name, Direction::Input, polarity, None)?;
        info!("Button registered on {} ({:?})", name, polarity);
        Ok(Self {
            line,
            watcher: ButtonWatcher::new(polarity),
            read_error_streak: 0,
        })
    }

    pub fn name(&self) -> &str {
        self.line.name()
    }

    pub fn is_open(&self) -> bool {
        self.line.is_open()
    }

    pub fn is_pressed(&self) -> bool {
        self.watcher.is_pressed()
    }

    pub fn stats(&self) -> WatcherStats {
        self.watcher.stats()
    }

    /// Sample the line once and report a logical transition, if any
    pub fn poll(&mut self) -> Option<ButtonEvent> {
        if !self.line.is_open() {
            return None;
        }

        match self.line.read() {
            Ok(level) => {
                if self.read_error_streak > 0 {
                    info!(
                        "Button {} readable again after {} failed reads",
                        self.name(),
                        self.read_error_streak
                    );
                    self.read_error_streak = 0;
                }
                let event = self.watcher.on_transition(level);
                if let Some(event) = event {
                    debug!("Button {} {:?} (raw {})", self.name(), event, level);
                }
                event
            }
            Err(e) => {
                if self.read_error_streak == 0 {
                    error!("Error on peripheral I/O reading button: {}", e);
                }
                self.read_error_streak = self.read_error_streak.saturating_add(1);
                None
            }
        }
    }

    /// Unregister and release the line. Idempotent.
    pub fn close(&self) -> Result<(), PeripheralError> {
        self.line.close()
    }
}

impl std::fmt::Debug for ButtonInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ButtonInput")
            .field("line", &self.line)
            .field("pressed", &self.watcher.is_pressed())
            .finish()
    }
}
