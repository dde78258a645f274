use super::driver::{Direction, Level, PeripheralDriver, PinHandle, Polarity};
use crate::error::PeripheralError;
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

const CONSUMER: &str = "doorbell";

/// GPIO access through the Linux character device (`/dev/gpiochipN`).
///
/// Pin names are resolved in this order: a `BCM<n>`/`GPIO<n>` label maps to
/// offset `n`, a bare number is an offset, anything else is matched against
/// the line names the kernel reports.
pub struct CdevPeripheralDriver {
    chip_path: String,
    chip: Mutex<Chip>,
    handles: Mutex<HashMap<u64, LineHandle>>,
    next_handle: Mutex<u64>,
}

impl CdevPeripheralDriver {
    pub fn new(chip_path: &str) -> Result<Self, PeripheralError> {
        let chip = Chip::new(chip_path).map_err(|e| PeripheralError::Open {
            line: chip_path.to_string(),
            details: e.to_string(),
        })?;

        debug!(
            "Opened GPIO chip {} ({} lines)",
            chip_path,
            chip.num_lines()
        );

        Ok(Self {
            chip_path: chip_path.to_string(),
            chip: Mutex::new(chip),
            handles: Mutex::new(HashMap::new()),
            next_handle: Mutex::new(1),
        })
    }

    fn resolve_offset(&self, name: &str) -> Result<u32, PeripheralError> {
        let numeric = name
            .strip_prefix("BCM")
            .or_else(|| name.strip_prefix("GPIO"))
            .unwrap_or(name);

        if let Ok(offset) = numeric.parse::<u32>() {
            return Ok(offset);
        }

        let mut chip = self.chip.lock();
        for offset in 0..chip.num_lines() {
            let line = match chip.get_line(offset) {
                Ok(line) => line,
                Err(_) => continue,
            };
            if let Ok(info) = line.info() {
                if info.name() == Some(name) {
                    return Ok(offset);
                }
            }
        }

        Err(PeripheralError::LineNotFound {
            line: name.to_string(),
        })
    }
}

impl PeripheralDriver for CdevPeripheralDriver {
    fn list_lines(&self) -> Vec<String> {
        let mut chip = self.chip.lock();
        let mut names = Vec::new();
        for offset in 0..chip.num_lines() {
            let label = chip
                .get_line(offset)
                .ok()
                .and_then(|line| line.info().ok())
                .and_then(|info| info.name().map(str::to_string));
            names.push(label.unwrap_or_else(|| format!("{}:{}", self.chip_path, offset)));
        }
        names
    }

    fn open_line(
        &self,
        name: &str,
        direction: Direction,
        polarity: Polarity,
        initial: Option<Level>,
    ) -> Result<PinHandle, PeripheralError> {
        let offset = self.resolve_offset(name)?;

        let line = self
            .chip
            .lock()
            .get_line(offset)
            .map_err(|e| PeripheralError::LineNotFound {
                line: format!("{} ({})", name, e),
            })?;

        let (flags, default) = match direction {
            Direction::Input => (LineRequestFlags::INPUT, 0),
            Direction::Output => (
                LineRequestFlags::OUTPUT,
                initial.map(|l| l.is_high() as u8).unwrap_or(0),
            ),
        };

        let line_handle = line
            .request(flags, default, CONSUMER)
            .map_err(|e| PeripheralError::Open {
                line: name.to_string(),
                details: e.to_string(),
            })?;

        let id = {
            let mut next = self.next_handle.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.handles.lock().insert(id, line_handle);

        Ok(PinHandle::new(id, name, direction, polarity))
    }

    fn read(&self, handle: &PinHandle) -> Result<Level, PeripheralError> {
        let handles = self.handles.lock();
        let line_handle = handles
            .get(&handle.id())
            .ok_or_else(|| PeripheralError::Closed {
                line: handle.name().to_string(),
            })?;

        line_handle
            .get_value()
            .map(|value| Level::from(value != 0))
            .map_err(|e| PeripheralError::Read {
                line: handle.name().to_string(),
                details: e.to_string(),
            })
    }

    fn write(&self, handle: &PinHandle, level: Level) -> Result<(), PeripheralError> {
        let handles = self.handles.lock();
        let line_handle = handles
            .get(&handle.id())
            .ok_or_else(|| PeripheralError::Closed {
                line: handle.name().to_string(),
            })?;

        line_handle
            .set_value(level.is_high() as u8)
            .map_err(|e| PeripheralError::Write {
                line: handle.name().to_string(),
                details: e.to_string(),
            })
    }

    fn close(&self, handle: &PinHandle) -> Result<(), PeripheralError> {
        // Dropping the kernel line handle releases the request
        match self.handles.lock().remove(&handle.id()) {
            Some(_) => Ok(()),
            None => {
                warn!("GPIO line {} was not open", handle.name());
                Err(PeripheralError::Closed {
                    line: handle.name().to_string(),
                })
            }
        }
    }
}
