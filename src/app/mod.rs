mod components;
mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use components::{mock_peripheral, Collaborators};
pub use orchestrator::{DoorbellOrchestrator, ShutdownHandle};
pub use state::{CycleStats, OrchestratorState};
pub use types::{ComponentState, CycleOutcome, CycleStage, CycleState, ShutdownReason};
