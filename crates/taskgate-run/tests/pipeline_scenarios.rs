// taskgate-run/tests/pipeline_scenarios.rs
// ============================================================================
// Module: Run Pipeline Scenario Tests
// Description: End-to-end coverage of deterministic scheduling, exhausted
// retries, and gate rejection across the dispatcher, harness, and checker.
// Purpose: Exercise the full pipeline the way an operator would run it,
// beyond the single-crate unit tests each stage already carries.
// Dependencies: taskgate-core, taskgate-eventbus, taskgate-pipeline,
// taskgate-run, tempfile
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

use std::collections::BTreeSet;
use std::sync::Arc;

use taskgate_core::AttemptStatus;
use taskgate_core::Budgets;
use taskgate_core::GateStatus;
use taskgate_core::PlanCard;
use taskgate_core::PreContract;
use taskgate_core::PreContractActions;
use taskgate_core::RunId;
use taskgate_core::Task;
use taskgate_core::TaskId;
use taskgate_core::TaskState;
use taskgate_core::WorkQueue;
use taskgate_core::reason_code::EXEC_NONZERO_EXIT;
use taskgate_core::reason_code::TRANSIENT_NETWORK;
use taskgate_eventbus::EventBus;
use taskgate_pipeline::DispatcherSupervisor;
use taskgate_pipeline::RawOutcome;
use taskgate_run::RunConfig;
use taskgate_run::run_demo;

fn independent_task(id: &str, priority: &str, created_at: &str) -> Task {
    Task {
        task_id: TaskId::new(id),
        goal: format!("goal for {id}"),
        status: taskgate_core::TaskStatus::Queued,
        dependencies: BTreeSet::new(),
        worker_model: None,
        priority: Some(priority.to_string()),
        created_at: Some(created_at.to_string()),
        payload_digest: None,
        requested_method: None,
        tool_contract: None,
        spawn_spec: None,
        extra: serde_json::Map::new(),
    }
}

fn demo_contract() -> PreContract {
    PreContract {
        packet_id: "pkt-pipeline-scenarios".to_string(),
        base_ref: "main".to_string(),
        budgets: Budgets { iteration_budget: 2, time_minutes: None },
        actions: PreContractActions { test: None },
        plan_card: PlanCard { why: "scenario coverage".to_string(), what: "a change".to_string() },
    }
}

/// Scenario 2: three independent tasks inserted in order `c, a, b` with
/// created-at timestamps `00:00:03`, `00:00:01`, `00:00:02` must dispatch
/// in tie-break order `a, b, c`, regardless of insertion order.
#[tokio::test]
async fn deterministic_scheduling_orders_by_tiebreak_not_insertion_order() {
    let bus = Arc::new(EventBus::new(None).unwrap());
    let queue = WorkQueue {
        version: "taskgate.work.queue/v1".to_string(),
        run_id: RunId::new("run-scenario-2"),
        base_ref: "main".to_string(),
        max_workers: 3,
        tasks: vec![
            independent_task("t-c", "normal", "00:00:03"),
            independent_task("t-a", "normal", "00:00:01"),
            independent_task("t-b", "normal", "00:00:02"),
        ],
    };
    let passing = Arc::new(|task: &Task| taskgate_core::TaskResult {
        task_id: task.task_id.clone(),
        status: AttemptStatus::Pass,
        attempts: 1,
        attempt_history: vec![],
        retry_backoff_ms: vec![],
        reason_code: None,
        worker_model: task.worker_model.clone().unwrap_or_default(),
        transient: None,
        evidence_bundle_path: String::new(),
        attempt_history_path: String::new(),
        dlq_path: None,
    });
    let supervisor = DispatcherSupervisor::new(bus, vec!["model-a".to_string()], passing).unwrap();
    let summary = supervisor.dispatch(&queue).await.unwrap();

    let order: Vec<&str> = summary.dispatch_order.iter().map(|entry| entry.task_id.as_str()).collect();
    assert_eq!(order, vec!["t-a", "t-b", "t-c"]);
}

/// Scenario 4: a worker that always reports a transient failure exhausts
/// its retries and leaves a dead-letter record on disk for the affected
/// task, with the run's state persisted throughout.
#[tokio::test]
async fn exhausted_transient_failure_persists_a_dead_letter_record() {
    let dir = tempfile::tempdir().unwrap();
    let worker: taskgate_pipeline::RawWorkerFn = Arc::new(|task: &Task| RawOutcome {
        status: AttemptStatus::Fail,
        reason_code: Some(TRANSIENT_NETWORK.to_string()),
        notes: Some("synthetic transient failure".to_string()),
        worker_model: task.worker_model.clone().unwrap_or_default(),
        duration_ms: 0,
        transient: true,
    });
    let config = RunConfig { run_root: dir.path().to_path_buf(), worker_models: vec!["model-a".to_string()], risk_threshold: 60 };

    let outcome = run_demo(&demo_contract(), worker, config).await.unwrap();
    assert_eq!(outcome.gate_decision.status, GateStatus::Reject);

    let run_dir = dir.path().join("pkt-pipeline-scenarios");
    let dlq_dir = run_dir.join("dlq");
    let dlq_entries: Vec<_> = std::fs::read_dir(&dlq_dir)
        .unwrap_or_else(|err| panic!("expected a dlq directory at {}: {err}", dlq_dir.display()))
        .collect();
    assert!(!dlq_entries.is_empty(), "exhausted transient failures must leave a dead-letter record");

    for result in &outcome.summary.results {
        if result.result.status == AttemptStatus::Fail {
            assert!(result.result.attempts > 1, "exhausted retries should show more than one attempt");
            assert!(result.result.dlq_path.is_some());
        }
    }
}

/// Scenario 5: any task failure rejects the gate, even when other tasks
/// in the same wave pass.
#[tokio::test]
async fn any_task_failure_rejects_the_gate() {
    let dir = tempfile::tempdir().unwrap();
    let worker: taskgate_pipeline::RawWorkerFn = Arc::new(|task: &Task| RawOutcome {
        status: AttemptStatus::Fail,
        reason_code: Some(EXEC_NONZERO_EXIT.to_string()),
        notes: Some("synthetic non-transient failure".to_string()),
        worker_model: task.worker_model.clone().unwrap_or_default(),
        duration_ms: 0,
        transient: false,
    });
    let config = RunConfig { run_root: dir.path().to_path_buf(), worker_models: vec!["model-a".to_string()], risk_threshold: 60 };

    let outcome = run_demo(&demo_contract(), worker, config).await.unwrap();
    assert_eq!(outcome.gate_decision.status, GateStatus::Reject);
    assert_eq!(outcome.promotion_decision.decision, GateStatus::Reject);
    assert!(outcome.gate_decision.reason_codes.iter().any(|code| code == EXEC_NONZERO_EXIT));
    assert!(outcome.state_space.work_items.iter().any(|item| item.status != TaskState::Done));
}
