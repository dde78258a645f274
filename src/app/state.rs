use super::types::{ComponentState, CycleOutcome, CycleState};
use super::DoorbellOrchestrator;
use crate::error::CaptureError;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::debug;

/// Counters over the lifetime of the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub presses_ignored: u64,
}

/// Capture-cycle state owned by the orchestrator's main loop.
///
/// Every transition goes through a method here; results that do not match
/// the active cycle and its current state are refused, which is how late
/// results from abandoned cycles are ignored.
#[derive(Debug)]
pub struct OrchestratorState {
    cycle: CycleState,
    active: Option<u64>,
    next_cycle_id: u64,
    last_outcome: Option<CycleOutcome>,
    capture_deadline: Option<Instant>,
    stats: CycleStats,
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self {
            cycle: CycleState::Idle,
            active: None,
            next_cycle_id: 1,
            last_outcome: None,
            capture_deadline: None,
            stats: CycleStats::default(),
        }
    }

    pub fn cycle(&self) -> CycleState {
        self.cycle
    }

    pub fn is_idle(&self) -> bool {
        self.cycle.is_idle()
    }

    pub fn active_cycle(&self) -> Option<u64> {
        self.active
    }

    pub fn last_outcome(&self) -> Option<CycleOutcome> {
        self.last_outcome
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn capture_deadline(&self) -> Option<Instant> {
        self.capture_deadline
    }

    pub fn set_capture_deadline(&mut self, deadline: Option<Instant>) {
        self.capture_deadline = deadline;
    }

    /// True if `cycle_id` is the active cycle and it sits in `state`
    pub fn is_current(&self, cycle_id: u64, state: CycleState) -> bool {
        self.active == Some(cycle_id) && self.cycle == state
    }

    /// Admit a new cycle: `Idle -> Triggering`
    pub fn begin_cycle(&mut self) -> Result<u64, CaptureError> {
        if !self.is_idle() {
            return Err(CaptureError::Busy);
        }

        let cycle_id = self.next_cycle_id;
        self.next_cycle_id += 1;
        self.active = Some(cycle_id);
        self.cycle = CycleState::Triggering;
        self.stats.started += 1;
        Ok(cycle_id)
    }

    /// Move `cycle_id` one stage forward. Returns the previous state, or
    /// `None` if the cycle is not active.
    pub fn advance(&mut self, cycle_id: u64) -> Option<CycleState> {
        if self.active != Some(cycle_id) || self.cycle.is_idle() {
            return None;
        }

        let from = self.cycle;
        let to = from.next();
        if to.is_idle() {
            // Leaving Publishing is a completion, not an advance
            return None;
        }
        self.cycle = to;
        Some(from)
    }

    /// End `cycle_id` with `outcome`, returning to `Idle`. Returns the state
    /// the cycle was in, or `None` if it was not active.
    pub fn finish(&mut self, cycle_id: u64, outcome: CycleOutcome) -> Option<CycleState> {
        if self.active != Some(cycle_id) || self.cycle.is_idle() {
            return None;
        }

        let from = self.cycle;
        self.cycle = CycleState::Idle;
        self.active = None;
        self.capture_deadline = None;
        self.last_outcome = Some(outcome);
        match outcome {
            CycleOutcome::Success => self.stats.succeeded += 1,
            CycleOutcome::Failed => self.stats.failed += 1,
        }
        Some(from)
    }

    pub fn note_press_ignored(&mut self) {
        self.stats.presses_ignored += 1;
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new()
    }
}

impl DoorbellOrchestrator {
    /// Update component state
    pub fn set_component_state(&mut self, component: &str, state: ComponentState) {
        debug!("Component '{}' state changed to: {:?}", component, state);
        self.component_states.insert(component.to_string(), state);
    }

    /// Get component state
    pub fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.get(component).cloned()
    }

    /// Get all component states
    pub fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.clone()
    }

    pub fn cycle_state(&self) -> CycleState {
        self.state.cycle()
    }

    pub fn cycle_stats(&self) -> CycleStats {
        self.state.stats()
    }

    pub fn last_outcome(&self) -> Option<CycleOutcome> {
        self.state.last_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_walks_every_stage() {
        let mut state = OrchestratorState::new();
        let id = state.begin_cycle().unwrap();
        assert_eq!(id, 1);

        let mut seen = vec![state.cycle()];
        while state.advance(id).is_some() {
            seen.push(state.cycle());
        }
        assert_eq!(
            seen,
            vec![
                CycleState::Triggering,
                CycleState::AwaitingImage,
                CycleState::Encoding,
                CycleState::Annotating,
                CycleState::Publishing,
            ]
        );

        assert_eq!(state.finish(id, CycleOutcome::Success), Some(CycleState::Publishing));
        assert!(state.is_idle());
        assert_eq!(state.last_outcome(), Some(CycleOutcome::Success));
        assert_eq!(state.stats().succeeded, 1);
    }

    #[test]
    fn test_only_one_cycle_admitted() {
        let mut state = OrchestratorState::new();
        let id = state.begin_cycle().unwrap();
        state.advance(id);

        assert_eq!(state.begin_cycle(), Err(CaptureError::Busy));
        assert!(state.is_current(id, CycleState::AwaitingImage));
        assert_eq!(state.stats().started, 1);
    }

    #[test]
    fn test_stale_cycle_is_refused() {
        let mut state = OrchestratorState::new();
        let first = state.begin_cycle().unwrap();
        state.finish(first, CycleOutcome::Failed);

        let second = state.begin_cycle().unwrap();
        assert_eq!(second, 2);
        assert_eq!(state.advance(first), None);
        assert_eq!(state.finish(first, CycleOutcome::Success), None);
        assert!(state.is_current(second, CycleState::Triggering));
    }
}
