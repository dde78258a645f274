use super::driver::{Direction, Level, PeripheralDriver, PinHandle, Polarity};
use crate::error::PeripheralError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Operations recorded by [`MockPeripheralDriver`]. Reads are not recorded
/// since the button is polled continuously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpioOp {
    Open { line: String },
    Write { line: String, level: Level },
    Close { line: String },
}

struct MockLine {
    level: Level,
    open_handle: Option<u64>,
}

#[derive(Default)]
struct MockState {
    lines: BTreeMap<String, MockLine>,
    next_handle: u64,
    journal: Vec<GpioOp>,
    failing_opens: HashSet<String>,
    failing_writes: HashSet<String>,
    failing_reads: HashSet<String>,
}

/// In-memory GPIO driver used by the simulator and the tests.
///
/// Input levels are set from the outside with [`MockPeripheralDriver::set_level`],
/// which plays the role of the electrical signal on the pin.
pub struct MockPeripheralDriver {
    state: Mutex<MockState>,
}

impl MockPeripheralDriver {
    /// Driver exposing the given line names, all initially low
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = MockState {
            next_handle: 1,
            ..MockState::default()
        };
        for name in lines {
            state.lines.insert(
                name.into(),
                MockLine {
                    level: Level::Low,
                    open_handle: None,
                },
            );
        }

        Self {
            state: Mutex::new(state),
        }
    }

    /// Driver exposing a Raspberry Pi style header (`BCM0`..`BCM27`)
    pub fn with_board_lines() -> Self {
        Self::new((0..28).map(|n| format!("BCM{}", n)))
    }

    /// Drive the electrical level of a line
    pub fn set_level(&self, line: &str, level: Level) {
        let mut state = self.state.lock();
        if let Some(mock_line) = state.lines.get_mut(line) {
            mock_line.level = level;
        }
    }

    pub fn level(&self, line: &str) -> Option<Level> {
        self.state.lock().lines.get(line).map(|l| l.level)
    }

    pub fn is_line_open(&self, line: &str) -> bool {
        self.state
            .lock()
            .lines
            .get(line)
            .map(|l| l.open_handle.is_some())
            .unwrap_or(false)
    }

    /// Make future opens of `line` fail
    pub fn fail_opens_on(&self, line: &str) {
        self.state.lock().failing_opens.insert(line.to_string());
    }

    /// Make future writes to `line` fail
    pub fn fail_writes_on(&self, line: &str) {
        self.state.lock().failing_writes.insert(line.to_string());
    }

    /// Make future reads of `line` fail
    pub fn fail_reads_on(&self, line: &str) {
        self.state.lock().failing_reads.insert(line.to_string());
    }

    /// Every open, write and close performed so far
    pub fn journal(&self) -> Vec<GpioOp> {
        self.state.lock().journal.clone()
    }

    /// Writes recorded for one line
    pub fn writes_to(&self, line: &str) -> Vec<Level> {
        self.journal()
            .into_iter()
            .filter_map(|op| match op {
                GpioOp::Write { line: l, level } if l == line => Some(level),
                _ => None,
            })
            .collect()
    }

    fn check_handle(state: &MockState, handle: &PinHandle) -> Result<(), PeripheralError> {
        match state.lines.get(handle.name()) {
            Some(line) if line.open_handle == Some(handle.id()) => Ok(()),
            Some(_) => Err(PeripheralError::Closed {
                line: handle.name().to_string(),
            }),
            None => Err(PeripheralError::LineNotFound {
                line: handle.name().to_string(),
            }),
        }
    }
}

impl PeripheralDriver for MockPeripheralDriver {
    fn list_lines(&self) -> Vec<String> {
        self.state.lock().lines.keys().cloned().collect()
    }

    fn open_line(
        &self,
        name: &str,
        direction: Direction,
        polarity: Polarity,
        initial: Option<Level>,
    ) -> Result<PinHandle, PeripheralError> {
        let mut state = self.state.lock();

        if state.failing_opens.contains(name) {
            return Err(PeripheralError::Open {
                line: name.to_string(),
                details: "simulated open failure".to_string(),
            });
        }

        let id = state.next_handle;
        let line = state
            .lines
            .get_mut(name)
            .ok_or_else(|| PeripheralError::LineNotFound {
                line: name.to_string(),
            })?;

        if line.open_handle.is_some() {
            return Err(PeripheralError::Open {
                line: name.to_string(),
                details: "line is busy".to_string(),
            });
        }

        line.open_handle = Some(id);
        if direction == Direction::Output {
            if let Some(level) = initial {
                line.level = level;
            }
        }

        state.next_handle += 1;
        state.journal.push(GpioOp::Open {
            line: name.to_string(),
        });
        debug!("Mock GPIO line {} opened with handle {}", name, id);

        Ok(PinHandle::new(id, name, direction, polarity))
    }

    fn read(&self, handle: &PinHandle) -> Result<Level, PeripheralError> {
        let state = self.state.lock();
        Self::check_handle(&state, handle)?;

        if state.failing_reads.contains(handle.name()) {
            return Err(PeripheralError::Read {
                line: handle.name().to_string(),
                details: "simulated read failure".to_string(),
            });
        }

        Ok(state.lines[handle.name()].level)
    }

    fn write(&self, handle: &PinHandle, level: Level) -> Result<(), PeripheralError> {
        let mut state = self.state.lock();
        Self::check_handle(&state, handle)?;

        if handle.direction() != Direction::Output {
            return Err(PeripheralError::Unsupported {
                line: handle.name().to_string(),
                details: "write to an input line".to_string(),
            });
        }

        if state.failing_writes.contains(handle.name()) {
            return Err(PeripheralError::Write {
                line: handle.name().to_string(),
                details: "simulated write failure".to_string(),
            });
        }

        if let Some(line) = state.lines.get_mut(handle.name()) {
            line.level = level;
        }
        state.journal.push(GpioOp::Write {
            line: handle.name().to_string(),
            level,
        });
        Ok(())
    }

    fn close(&self, handle: &PinHandle) -> Result<(), PeripheralError> {
        let mut state = self.state.lock();
        Self::check_handle(&state, handle)?;

        if let Some(line) = state.lines.get_mut(handle.name()) {
            line.open_handle = None;
        }
        state.journal.push(GpioOp::Close {
            line: handle.name().to_string(),
        });
        debug!("Mock GPIO line {} closed", handle.name());
        Ok(())
    }
}
