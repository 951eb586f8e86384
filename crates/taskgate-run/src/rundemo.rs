// taskgate-run/src/rundemo.rs
// ============================================================================
// Module: Taskgate Run Demo
// Description: Wires the planner, implementer harness, checker, promoter,
// control ledger, and state writer into one end-to-end run.
// Purpose: The reference entry point every other run mode specializes.
// Dependencies: taskgate-core, taskgate-eventbus, taskgate-pipeline
// ============================================================================

//! ## Overview
//! Mirrors `RalphOrchestrator.run_wave`'s plan → assign → dispatch → gate →
//! promote sequence, extended with the control-ledger materialization and
//! state-space write the orchestrator split into separate scripts. A
//! [`RunOutcome`] bundles every stage's artifact so a caller (or a CLI
//! subcommand) can inspect the full run without re-reading files from disk.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use taskgate_core::AttemptStatus;
use taskgate_core::AtomicWriteError;
use taskgate_core::FileAuditSink;
use taskgate_core::GateDecision;
use taskgate_core::PreContract;
use taskgate_core::PromotionDecision;
use taskgate_core::ReasonCodeCatalog;
use taskgate_core::Task;
use taskgate_core::WorkQueue;
use taskgate_core::atomic_write_json;
use taskgate_eventbus::ControlLedger;
use taskgate_eventbus::EventBus;
use taskgate_eventbus::EventBusError;
use taskgate_eventbus::load_envelopes;
use taskgate_eventbus::materialize_control_ledger;
use taskgate_eventbus::replay::ReplayError;
use taskgate_pipeline::CheckerError;
use taskgate_pipeline::DispatchError;
use taskgate_pipeline::HarnessError;
use taskgate_pipeline::ImplementerHarness;
use taskgate_pipeline::PlannerError;
use taskgate_pipeline::PromotionPolicy;
use taskgate_pipeline::RawOutcome;
use taskgate_pipeline::RawWorkerFn;
use taskgate_pipeline::RetryPolicy;
use taskgate_pipeline::RunSummary;
use taskgate_pipeline::StateSpace;
use taskgate_pipeline::StateWriterError;
use taskgate_pipeline::VerifyOutcome;
use taskgate_pipeline::create_gate_decision;
use taskgate_pipeline::create_promotion_decision;
use taskgate_pipeline::pre_contract_to_work_queue;
use taskgate_pipeline::record_gate_decision;
use taskgate_pipeline::record_promotion;
use taskgate_pipeline::substrate::ensure_substrate_layout;
use taskgate_pipeline::update_state_space;

use crate::manifest::RunManifest;
use crate::manifest::RuntimeFingerprint;
use crate::manifest::build_run_manifest;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised running the end-to-end demo pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Planning the work queue failed.
    #[error(transparent)]
    Planner(#[from] PlannerError),
    /// Building the implementer harness failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Running the implementer harness failed.
    #[error(transparent)]
    Harness(#[from] HarnessError),
    /// Computing the gate decision failed.
    #[error(transparent)]
    Checker(#[from] CheckerError),
    /// Folding the promotion into the state space failed.
    #[error(transparent)]
    StateWriter(#[from] StateWriterError),
    /// Persisting a run artifact failed.
    #[error(transparent)]
    Write(#[from] AtomicWriteError),
    /// Publishing or replaying an event failed.
    #[error(transparent)]
    Bus(#[from] EventBusError),
    /// Replaying the durable event log failed.
    #[error(transparent)]
    Replay(#[from] ReplayError),
    /// Preparing the run's substrate layout failed.
    #[error("failed to prepare substrate layout: {0}")]
    Substrate(#[source] std::io::Error),
}

// ============================================================================
// SECTION: Run Outcome
// ============================================================================

/// Every artifact one end-to-end run produces, bundled for inspection.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The planned work queue.
    pub work_queue: WorkQueue,
    /// The harness's per-task result summary.
    pub summary: RunSummary,
    /// The wave's gate decision.
    pub gate_decision: GateDecision,
    /// The wave's promotion decision.
    pub promotion_decision: PromotionDecision,
    /// The control ledger folded from the durable event log.
    pub control_ledger: ControlLedger,
    /// The run's final state space.
    pub state_space: StateSpace,
    /// The run's manifest.
    pub manifest: RunManifest,
}

/// Configuration shared by every run entry point.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root directory every run's artifacts are persisted under.
    pub run_root: PathBuf,
    /// Worker models the dispatcher round-robins across unassigned tasks.
    pub worker_models: Vec<String>,
    /// Risk-score threshold above which an approved gate escalates.
    pub risk_threshold: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_root: PathBuf::from("runs"),
            worker_models: vec!["taskgate-worker-a".to_string()],
            risk_threshold: 60,
        }
    }
}

// ============================================================================
// SECTION: Demo Worker
// ============================================================================

/// A synthetic worker that always succeeds, mirroring the orchestrator's
/// `_run_worker` reference implementation (a real harness would call out to
/// an actual implementer process instead).
#[must_use]
pub fn default_demo_worker() -> RawWorkerFn {
    Arc::new(|task: &Task| {
        let started = Instant::now();
        #[allow(
            clippy::cast_possible_truncation,
            reason = "a synthetic worker call never runs long enough to overflow u64 millis"
        )]
        let duration_ms = started.elapsed().as_millis() as u64;
        RawOutcome {
            status: AttemptStatus::Pass,
            reason_code: None,
            notes: Some("synthetic worker result".to_string()),
            worker_model: task.worker_model.clone().unwrap_or_default(),
            duration_ms,
            transient: false,
        }
    })
}

// ============================================================================
// SECTION: Run Demo
// ============================================================================

/// Runs the full pipeline over `contract` using `worker`, persisting every
/// artifact under `config.run_root` (`spec` §4.11, `RunDemo`).
///
/// # Errors
///
/// Returns [`RunError`] if any pipeline stage fails.
pub async fn run_demo(contract: &PreContract, worker: RawWorkerFn, config: RunConfig) -> Result<RunOutcome, RunError> {
    let work_queue = pre_contract_to_work_queue(contract)?;
    let run_id = work_queue.run_id.to_string();
    let run_dir = config.run_root.join(&run_id);
    let event_log = run_dir.join("events.jsonl");

    ensure_substrate_layout(&config.run_root, &run_id).map_err(RunError::Substrate)?;

    let audit_sink: Arc<dyn taskgate_core::AuditSink> =
        Arc::new(FileAuditSink::new(&run_dir.join("audit.jsonl")).map_err(RunError::Substrate)?);

    let bus = Arc::new(EventBus::new(Some(event_log.clone()))?);
    let harness = ImplementerHarness::new(
        Arc::clone(&bus),
        config.run_root.clone(),
        config.worker_models.clone(),
        worker,
        RetryPolicy::default(),
    )?
    .with_audit_sink(Arc::clone(&audit_sink));
    let summary = harness.run(&work_queue).await?;

    let catalog = ReasonCodeCatalog::default_catalog();
    let gate_decision = create_gate_decision(&summary, &catalog, VerifyOutcome::skipped(), config.risk_threshold)?;
    let gate_path = run_dir.join("gate").join("gate.decision.json");
    atomic_write_json(&gate_path, &gate_decision)?;
    record_gate_decision(audit_sink.as_ref(), &gate_decision);

    let promotion_decision = create_promotion_decision(&gate_decision, PromotionPolicy::default());
    let promotion_path = run_dir.join("promotion").join("promotion.decision.json");
    atomic_write_json(&promotion_path, &promotion_decision)?;
    record_promotion(audit_sink.as_ref(), &promotion_decision);

    let events = load_envelopes(&event_log, Some(run_id.as_str()))?;
    let control_ledger = materialize_control_ledger(&events);
    let ledger_path = run_dir.join("control.ledger.json");
    atomic_write_json(&ledger_path, &control_ledger)?;

    let state_space =
        update_state_space(StateSpace::default(), &work_queue, &summary, &gate_decision, &promotion_decision)?;
    let state_path = run_dir.join("state.space.json");
    atomic_write_json(&state_path, &state_space)?;

    let manifest = build_run_manifest(
        contract,
        &work_queue,
        &serde_json::to_value(StateSpace::default()).unwrap_or(serde_json::Value::Null),
        &catalog,
        RuntimeFingerprint::capture(None),
        vec![
            "plan".to_string(),
            "dispatch".to_string(),
            "implement".to_string(),
            "gate".to_string(),
            "promote".to_string(),
            "state-write".to_string(),
        ],
        artifact_paths(&run_dir, &event_log, &gate_path, &promotion_path, &ledger_path, &state_path),
    );
    let manifest_path = run_dir.join("run.manifest.json");
    atomic_write_json(&manifest_path, &manifest)?;

    Ok(RunOutcome {
        work_queue,
        summary,
        gate_decision,
        promotion_decision,
        control_ledger,
        state_space,
        manifest,
    })
}

fn artifact_paths(
    run_dir: &Path,
    event_log: &Path,
    gate_path: &Path,
    promotion_path: &Path,
    ledger_path: &Path,
    state_path: &Path,
) -> BTreeMap<String, String> {
    let path_str = |path: &Path| path.to_string_lossy().into_owned();
    BTreeMap::from([
        ("work_queue".to_string(), path_str(&run_dir.join("work.queue.json"))),
        ("summary".to_string(), path_str(&run_dir.join("summary.json"))),
        ("events".to_string(), path_str(event_log)),
        ("gate_decision".to_string(), path_str(gate_path)),
        ("promotion_decision".to_string(), path_str(promotion_path)),
        ("control_ledger".to_string(), path_str(ledger_path)),
        ("state_space".to_string(), path_str(state_path)),
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use taskgate_core::Budgets;
    use taskgate_core::GateStatus;
    use taskgate_core::PlanCard;
    use taskgate_core::PreContractActions;
    use tempfile::tempdir;

    use super::*;

    fn contract() -> PreContract {
        PreContract {
            packet_id: "pkt-run-demo".to_string(),
            base_ref: "main".to_string(),
            budgets: Budgets {
                iteration_budget: 2,
                time_minutes: None,
            },
            actions: PreContractActions { test: None },
            plan_card: PlanCard {
                why: "because".to_string(),
                what: "a change".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn a_fully_passing_demo_run_is_approved_and_done() {
        let dir = tempdir().unwrap();
        let config = RunConfig {
            run_root: dir.path().to_path_buf(),
            worker_models: vec!["model-a".to_string()],
            risk_threshold: 60,
        };
        let outcome = run_demo(&contract(), default_demo_worker(), config).await.unwrap();
        assert_eq!(outcome.gate_decision.status, GateStatus::Approve);
        assert_eq!(outcome.promotion_decision.decision, GateStatus::Approve);
        assert!(outcome.state_space.work_items.iter().all(|item| item.status == taskgate_core::TaskState::Done));
        assert!(dir.path().join("pkt-run-demo").join("run.manifest.json").is_file());
    }
}
