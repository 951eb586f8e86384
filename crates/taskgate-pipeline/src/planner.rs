// taskgate-pipeline/src/planner.rs
// ============================================================================
// Module: Taskgate Planner
// Description: Turns a pre-contract into a validated work queue.
// Purpose: The pipeline's entry point — every run starts from a PreContract
// and ends with a WorkQueue ready for the dispatcher.
// Dependencies: taskgate-core
// ============================================================================

//! ## Overview
//! Mirrors the orchestrator's `pre_contract_to_work_queue`: three fixed
//! tasks (`<packet_id>-plan`, `<packet_id>-implement`, and, when a verify
//! command is present, `<packet_id>-verify`), each depending on the one
//! before it, then validated with [`taskgate_core::WorkQueue::validate_task_graph`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use taskgate_core::PreContract;
use taskgate_core::RunId;
use taskgate_core::Task;
use taskgate_core::TaskId;
use taskgate_core::TaskStatus;
use taskgate_core::WorkQueue;
use taskgate_core::WorkQueueError;
use thiserror::Error;

/// Work queue schema version stamped by the planner.
pub const WORK_QUEUE_VERSION: &str = "dome.work.queue/v0.2";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised turning a pre-contract into a work queue.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The derived work queue failed graph validation.
    #[error(transparent)]
    Graph(#[from] WorkQueueError),
}

// ============================================================================
// SECTION: Planner
// ============================================================================

/// Builds and validates a [`WorkQueue`] from `contract` (`spec` §4.5).
///
/// # Errors
///
/// Returns [`PlannerError`] if the resulting work queue fails graph
/// validation (this should only happen for a malformed budget, never for the
/// fixed plan/implement/verify shape this function builds).
pub fn pre_contract_to_work_queue(contract: &PreContract) -> Result<WorkQueue, PlannerError> {
    let run_id = contract.run_id();
    let plan_id = TaskId::new(format!("{}-plan", contract.packet_id));
    let implement_id = TaskId::new(format!("{}-implement", contract.packet_id));

    let mut tasks = vec![
        bare_task(plan_id.clone(), "Produce a plan for the packet.", BTreeSet::new()),
        bare_task(
            implement_id.clone(),
            "Implement the planned change.",
            BTreeSet::from([plan_id]),
        ),
    ];

    if contract.actions.test.is_some() {
        let verify_id = TaskId::new(format!("{}-verify", contract.packet_id));
        tasks.push(bare_task(
            verify_id,
            "Run the verify command against the implemented change.",
            BTreeSet::from([implement_id]),
        ));
    }

    let queue = WorkQueue {
        version: WORK_QUEUE_VERSION.to_string(),
        run_id,
        base_ref: contract.base_ref.clone(),
        max_workers: contract.budgets.iteration_budget.max(1),
        tasks,
    };
    queue.validate_task_graph()?;
    Ok(queue)
}

/// Builds a task carrying only the fields the planner itself sets; the
/// dispatcher and harness populate the rest (`worker_model`, `priority`, ...)
/// as a run progresses.
fn bare_task(task_id: TaskId, goal: &str, dependencies: BTreeSet<TaskId>) -> Task {
    Task {
        task_id,
        goal: goal.to_string(),
        status: TaskStatus::Queued,
        dependencies,
        worker_model: None,
        priority: None,
        created_at: None,
        payload_digest: None,
        requested_method: None,
        tool_contract: None,
        spawn_spec: None,
        extra: serde_json::Map::new(),
    }
}

/// Returns the three canonical task identifiers a packet would produce, for
/// callers that need to reference them before planning (e.g. run manifests).
#[must_use]
pub fn task_ids_for_packet(packet_id: &str, has_verify: bool) -> Vec<TaskId> {
    let mut ids = vec![
        TaskId::new(format!("{packet_id}-plan")),
        TaskId::new(format!("{packet_id}-implement")),
    ];
    if has_verify {
        ids.push(TaskId::new(format!("{packet_id}-verify")));
    }
    ids
}

/// Returns the run identifier a pre-contract would plan under, without
/// building the full work queue.
#[must_use]
pub fn run_id_for(contract: &PreContract) -> RunId {
    contract.run_id()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use taskgate_core::Budgets;
    use taskgate_core::PlanCard;
    use taskgate_core::PreContractActions;
    use taskgate_core::TestAction;

    use super::PreContract;
    use super::pre_contract_to_work_queue;

    fn contract(with_verify: bool) -> PreContract {
        PreContract {
            packet_id: "pkt-demo-001".to_string(),
            base_ref: "main".to_string(),
            budgets: Budgets {
                iteration_budget: 3,
                time_minutes: None,
            },
            actions: PreContractActions {
                test: with_verify.then(|| TestAction::Command("cargo test".to_string())),
            },
            plan_card: PlanCard {
                why: "because".to_string(),
                what: "a change".to_string(),
            },
        }
    }

    #[test]
    fn builds_plan_and_implement_without_verify() {
        let queue = pre_contract_to_work_queue(&contract(false)).unwrap();
        assert_eq!(queue.tasks.len(), 2);
        assert_eq!(queue.tasks[0].task_id.as_str(), "pkt-demo-001-plan");
        assert_eq!(queue.tasks[1].task_id.as_str(), "pkt-demo-001-implement");
        assert!(queue.tasks[1].dependencies.contains(&queue.tasks[0].task_id));
    }

    #[test]
    fn includes_verify_task_when_test_action_present() {
        let queue = pre_contract_to_work_queue(&contract(true)).unwrap();
        assert_eq!(queue.tasks.len(), 3);
        assert_eq!(queue.tasks[2].task_id.as_str(), "pkt-demo-001-verify");
        assert!(queue.tasks[2].dependencies.contains(&queue.tasks[1].task_id));
    }

    #[test]
    fn run_id_is_derived_from_packet_id() {
        let queue = pre_contract_to_work_queue(&contract(false)).unwrap();
        assert_eq!(queue.run_id.as_str(), "pkt-demo-001");
    }

    #[test]
    fn max_workers_is_at_least_one() {
        let mut c = contract(false);
        c.budgets.iteration_budget = 0;
        let queue = pre_contract_to_work_queue(&c).unwrap();
        assert_eq!(queue.max_workers, 1);
    }
}
