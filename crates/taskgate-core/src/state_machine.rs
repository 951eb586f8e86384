// taskgate-core/src/state_machine.rs
// ============================================================================
// Module: Taskgate Task State Machine
// Description: Typed transition table for task lifecycle states.
// Purpose: Give the state writer a single, exhaustively-checked place to
// decide legal task transitions.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A task moves through a small fixed set of states. `DONE` and `BLOCKED`
//! are terminal: no signal transitions out of them. Every other transition
//! not named in [`legal_transitions`] is rejected with a
//! `STATE.INVALID_TRANSITION.<from>.<signal>` reason code.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::reason_code::invalid_transition_code;

// ============================================================================
// SECTION: States & Signals
// ============================================================================

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Queued, not yet claimed.
    Queued,
    /// Claimed by the dispatcher, not yet running.
    Claimed,
    /// Actively running.
    Running,
    /// Gated; awaiting promotion.
    Gated,
    /// Terminal success.
    Done,
    /// Terminal failure or escalation.
    Blocked,
}

impl TaskState {
    /// Returns the lowercase wire name used in reason codes
    /// (`STATE.INVALID_TRANSITION.<from>.<signal>`).
    #[must_use]
    pub const fn code_name(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Claimed => "CLAIMED",
            Self::Running => "RUNNING",
            Self::Gated => "GATED",
            Self::Done => "DONE",
            Self::Blocked => "BLOCKED",
        }
    }
}

/// Signal driving a task transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSignal {
    /// Dispatcher claims the task.
    Claim,
    /// The claimed task starts running.
    Run,
    /// The gate approved the task's result.
    GatePass,
    /// The gate rejected the task's result.
    GateFail,
    /// Any state is force-blocked (e.g. an upstream dependency failed).
    Block,
}

impl TaskSignal {
    /// Returns the wire name used in reason codes.
    #[must_use]
    pub const fn code_name(self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Run => "run",
            Self::GatePass => "gate_pass",
            Self::GateFail => "gate_fail",
            Self::Block => "block",
        }
    }
}

// ============================================================================
// SECTION: Transition Table
// ============================================================================

/// Returns the next state for `(from, signal)`, or `None` when the
/// transition is not legal.
#[must_use]
pub const fn legal_transition(from: TaskState, signal: TaskSignal) -> Option<TaskState> {
    match (from, signal) {
        (TaskState::Queued, TaskSignal::Claim) => Some(TaskState::Claimed),
        (TaskState::Queued, TaskSignal::Block) => Some(TaskState::Blocked),
        (TaskState::Claimed, TaskSignal::Run) => Some(TaskState::Running),
        (TaskState::Claimed, TaskSignal::Block) => Some(TaskState::Blocked),
        (TaskState::Running, TaskSignal::GatePass) => Some(TaskState::Gated),
        (TaskState::Running, TaskSignal::GateFail | TaskSignal::Block) => Some(TaskState::Blocked),
        (TaskState::Gated, TaskSignal::GatePass) => Some(TaskState::Done),
        (TaskState::Gated, TaskSignal::GateFail | TaskSignal::Block) => Some(TaskState::Blocked),
        _ => None,
    }
}

/// Outcome of applying a signal to a task state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    /// The resulting state. Equal to the input state when the transition
    /// was rejected.
    pub next_state: TaskState,
    /// Set when the transition was rejected.
    pub reason_code: Option<String>,
}

impl TransitionResult {
    /// Returns true when the transition was legal.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.reason_code.is_none()
    }
}

/// Applies `signal` to `from`, returning the resulting state or a
/// `STATE.INVALID_TRANSITION.<from>.<signal>` reason code.
#[must_use]
pub fn apply_transition(from: TaskState, signal: TaskSignal) -> TransitionResult {
    match legal_transition(from, signal) {
        Some(next_state) => TransitionResult {
            next_state,
            reason_code: None,
        },
        None => TransitionResult {
            next_state: from,
            reason_code: Some(invalid_transition_code(from.code_name(), signal.code_name())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::TaskSignal;
    use super::TaskState;
    use super::apply_transition;

    #[test]
    fn queued_claim_succeeds() {
        let result = apply_transition(TaskState::Queued, TaskSignal::Claim);
        assert!(result.is_ok());
        assert_eq!(result.next_state, TaskState::Claimed);
    }

    #[test]
    fn terminal_states_reject_every_signal() {
        for signal in [
            TaskSignal::Claim,
            TaskSignal::Run,
            TaskSignal::GatePass,
            TaskSignal::GateFail,
            TaskSignal::Block,
        ] {
            let result = apply_transition(TaskState::Done, signal);
            assert!(!result.is_ok());
            assert_eq!(result.next_state, TaskState::Done);
        }
    }

    #[test]
    fn invalid_transition_reason_code_names_from_and_signal() {
        let result = apply_transition(TaskState::Queued, TaskSignal::Run);
        assert_eq!(
            result.reason_code.as_deref(),
            Some("STATE.INVALID_TRANSITION.QUEUED.run")
        );
    }

    #[test]
    fn gated_gate_pass_reaches_done() {
        let result = apply_transition(TaskState::Gated, TaskSignal::GatePass);
        assert_eq!(result.next_state, TaskState::Done);
    }
}
