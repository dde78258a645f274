use crate::error::PeripheralError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical level of a digital line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn toggled(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }

    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "low"),
            Level::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

/// Which physical level means "active" for a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Active when the line reads high
    ActiveHigh,
    /// Active when the line reads low (e.g. a button to ground with pull-up)
    ActiveLow,
}

impl Polarity {
    /// Whether a raw level is the active level under this polarity
    pub fn is_active(self, level: Level) -> bool {
        match self {
            Polarity::ActiveHigh => level == Level::High,
            Polarity::ActiveLow => level == Level::Low,
        }
    }

    /// Raw level corresponding to the active or inactive state
    pub fn level_for(self, active: bool) -> Level {
        match self {
            Polarity::ActiveHigh => Level::from(active),
            Polarity::ActiveLow => Level::from(!active),
        }
    }
}

/// Driver-issued handle for one opened line.
///
/// Handles are not `Clone`: the component that opened a line owns it and
/// releases it through [`PeripheralDriver::close`].
#[derive(Debug, PartialEq, Eq)]
pub struct PinHandle {
    id: u64,
    name: String,
    direction: Direction,
    polarity: Polarity,
}

impl PinHandle {
    pub fn new(id: u64, name: impl Into<String>, direction: Direction, polarity: Polarity) -> Self {
        Self {
            id,
            name: name.into(),
            direction,
            polarity,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }
}

/// Platform GPIO access. Pin names are opaque, board-specific identifiers.
///
/// Reads and writes always deal in raw physical levels; polarity is carried
/// on the handle for the caller to interpret.
pub trait PeripheralDriver: Send + Sync {
    /// Names of the lines this driver can open
    fn list_lines(&self) -> Vec<String>;

    fn open_line(
        &self,
        name: &str,
        direction: Direction,
        polarity: Polarity,
        initial: Option<Level>,
    ) -> Result<PinHandle, PeripheralError>;

    fn read(&self, handle: &PinHandle) -> Result<Level, PeripheralError>;

    fn write(&self, handle: &PinHandle, level: Level) -> Result<(), PeripheralError>;

    fn close(&self, handle: &PinHandle) -> Result<(), PeripheralError>;
}
