use super::driver::{Direction, Level, PeripheralDriver, PinHandle, Polarity};
use crate::error::PeripheralError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Scoped handle over a single digital line.
///
/// The line is released exactly once: by an explicit [`GpioLine::close`] or,
/// failing that, when the value is dropped. Every operation takes the line
/// lock, so a write can never race with the release of the handle.
pub struct GpioLine {
    driver: Arc<dyn PeripheralDriver>,
    handle: PinHandle,
    open: Mutex<bool>,
}

impl GpioLine {
    /// Open a line through the driver
    pub fn open(
        driver: Arc<dyn PeripheralDriver>,
        name: &str,
        direction: Direction,
        polarity: Polarity,
        initial: Option<Level>,
    ) -> Result<Self, PeripheralError> {
        let handle = driver.open_line(name, direction, polarity, initial)?;
        info!(
            "Opened GPIO line {} as {:?} ({:?}, initial {:?})",
            name, direction, polarity, initial
        );

        Ok(Self {
            driver,
            handle,
            open: Mutex::new(true),
        })
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn direction(&self) -> Direction {
        self.handle.direction()
    }

    pub fn polarity(&self) -> Polarity {
        self.handle.polarity()
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Read the raw level of the line
    pub fn read(&self) -> Result<Level, PeripheralError> {
        let open = self.open.lock();
        if !*open {
            return Err(self.closed_error());
        }
        self.driver.read(&self.handle)
    }

    /// Write a raw level to the line
    pub fn write(&self, level: Level) -> Result<(), PeripheralError> {
        match self.write_if_open(level)? {
            true => Ok(()),
            false => Err(self.closed_error()),
        }
    }

    /// Write only if the line is still open. Returns `Ok(false)` without
    /// touching the driver when the line has already been released.
    pub fn write_if_open(&self, level: Level) -> Result<bool, PeripheralError> {
        let open = self.open.lock();
        if !*open {
            return Ok(false);
        }
        self.driver.write(&self.handle, level)?;
        Ok(true)
    }

    /// Release the line. Safe to call more than once; only the first call
    /// reaches the driver. The line counts as released even if the driver
    /// reports an error.
    pub fn close(&self) -> Result<(), PeripheralError> {
        let mut open = self.open.lock();
        if !*open {
            debug!("GPIO line {} already closed", self.name());
            return Ok(());
        }
        *open = false;

        let result = self.driver.close(&self.handle);
        match &result {
            Ok(()) => info!("Closed GPIO line {}", self.name()),
            Err(e) => error!("Error while closing GPIO line {}: {}", self.name(), e),
        }
        result
    }

    fn closed_error(&self) -> PeripheralError {
        PeripheralError::Closed {
            line: self.name().to_string(),
        }
    }
}

impl Drop for GpioLine {
    fn drop(&mut self) {
        if self.is_open() {
            debug!("Releasing GPIO line {} on drop", self.name());
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for GpioLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioLine")
            .field("handle", &self.handle)
            .field("open", &self.is_open())
            .finish()
    }
}
