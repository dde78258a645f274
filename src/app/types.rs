use serde::{Deserialize, Serialize};
use std::fmt;

/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "signal {}", name),
            ShutdownReason::Error(message) => write!(f, "error: {}", message),
            ShutdownReason::UserRequest => write!(f, "user request"),
        }
    }
}

/// Position of the orchestrator within a capture cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleState {
    Idle,
    Triggering,
    AwaitingImage,
    Encoding,
    Annotating,
    Publishing,
}

impl CycleState {
    /// The state a successful stage hands over to
    pub fn next(self) -> CycleState {
        match self {
            CycleState::Idle => CycleState::Triggering,
            CycleState::Triggering => CycleState::AwaitingImage,
            CycleState::AwaitingImage => CycleState::Encoding,
            CycleState::Encoding => CycleState::Annotating,
            CycleState::Annotating => CycleState::Publishing,
            CycleState::Publishing => CycleState::Idle,
        }
    }

    pub fn is_idle(self) -> bool {
        self == CycleState::Idle
    }
}

/// How the last cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleOutcome {
    Success,
    Failed,
}

/// Stage at which a cycle was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStage {
    Capture,
    Encoding,
    Annotation,
    Publish,
}
