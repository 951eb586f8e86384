// taskgate-pipeline/src/statewriter.rs
// ============================================================================
// Module: Taskgate State Writer
// Description: Folds a run's dispatch, gate, and promotion artifacts into a
// persisted state space, backed only by evidence bundles.
// Purpose: The last stage of the pipeline; the only place `state.space.json`
// is produced.
// Dependencies: taskgate-core
// ============================================================================

//! ## Overview
//! Mirrors the orchestrator's `update_state_space`: for every dispatched
//! task, it loads that task's evidence bundle from disk, walks the state
//! machine from `QUEUED` to either `DONE` (promoted and passing) or
//! `BLOCKED`, and records the result as one [`WorkItem`]. Evidence is the
//! only permitted provenance — a missing or malformed bundle fails the
//! whole update rather than being silently skipped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use taskgate_core::AttemptStatus;
use taskgate_core::EvidenceBundle;
use taskgate_core::GateDecision;
use taskgate_core::GateStatus;
use taskgate_core::PromotionDecision;
use taskgate_core::TaskId;
use taskgate_core::TaskSignal;
use taskgate_core::TaskState;
use taskgate_core::WorkQueue;
use taskgate_core::apply_transition;
use taskgate_core::model::topics;
use taskgate_eventbus::replay::ReplayError;
use taskgate_eventbus::replay::load_envelopes;

use crate::harness::PersistedTaskResult;
use crate::harness::RunSummary;

/// State-space schema version.
pub const STATE_SPACE_VERSION: &str = "0.2.0";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised folding run artifacts into a state space.
#[derive(Debug, thiserror::Error)]
pub enum StateWriterError {
    /// A task's evidence bundle could not be read from disk.
    #[error("missing evidence bundle for task {task_id}: {path}")]
    MissingEvidence {
        /// The affected task's identifier.
        task_id: String,
        /// The path that was expected to exist.
        path: String,
    },
    /// A task's evidence bundle failed validation.
    #[error("invalid evidence bundle for task {task_id}: {source}")]
    InvalidEvidence {
        /// The affected task's identifier.
        task_id: String,
        /// The underlying validation error.
        #[source]
        source: taskgate_core::EvidenceBundleError,
    },
    /// A required state transition was illegal.
    #[error("illegal state transition for task {task_id}: {reason_code}")]
    IllegalTransition {
        /// The affected task's identifier.
        task_id: String,
        /// The rejecting reason code.
        reason_code: String,
    },
    /// The durable event log could not be loaded or parsed.
    #[error("failed to replay event log: {0}")]
    Replay(#[from] ReplayError),
}

// ============================================================================
// SECTION: State Space
// ============================================================================

/// Fixed task-preference block carried on every state space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPreferences {
    /// Whether telemetry evidence is the only permitted source of truth.
    pub telemetry_is_ssot: bool,
}

impl Default for TaskPreferences {
    fn default() -> Self {
        Self {
            telemetry_is_ssot: true,
        }
    }
}

/// A work item's structural node description.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkItemNode {
    /// Requirement identifiers (unused by Taskgate's planner; carried for
    /// schema parity).
    #[serde(default)]
    pub reqs: Vec<String>,
    /// Dependency task identifiers.
    #[serde(default)]
    pub deps: Vec<TaskId>,
    /// Provenance tags; always `["telemetry"]` since evidence is the only
    /// permitted source.
    #[serde(default)]
    pub provs: Vec<String>,
    /// Assertions this item must satisfy.
    #[serde(rename = "assert", default)]
    pub assertions: Vec<String>,
}

/// The gate summary embedded on a [`WorkItem`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemGate {
    /// `"DONE"` or `"BLOCKED"`, the work item's gate-facing status.
    pub status: TaskState,
    /// Reason code, when the item is blocked.
    pub reason_code: Option<String>,
    /// Joined gate notes, when present.
    pub notes: Option<String>,
}

/// One task's folded state-space entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// The task's identifier.
    pub work_id: TaskId,
    /// The task's final lifecycle state.
    pub status: TaskState,
    /// Structural node description.
    pub node: WorkItemNode,
    /// The task's evidence bundle, the only permitted provenance.
    pub telemetry: EvidenceBundle,
    /// The task's gate summary.
    pub gate: WorkItemGate,
}

/// The persisted state space produced by [`update_state_space`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpace {
    /// State-space schema version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Free-form memory entries, untouched by the state writer.
    #[serde(default)]
    pub memory: Vec<Value>,
    /// Fixed task-preference block.
    #[serde(default)]
    pub task_preferences: TaskPreferences,
    /// Every task's folded entry, in dispatch order.
    #[serde(default)]
    pub work_items: Vec<WorkItem>,
}

fn default_version() -> String {
    STATE_SPACE_VERSION.to_string()
}

impl Default for StateSpace {
    fn default() -> Self {
        Self {
            version: default_version(),
            memory: Vec::new(),
            task_preferences: TaskPreferences::default(),
            work_items: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Update
// ============================================================================

/// Folds `run_summary`, `gate_decision`, and `promotion_decision` into
/// `state_space`, replacing its `work_items` (`spec` §4.10).
///
/// # Errors
///
/// Returns [`StateWriterError`] if any task's evidence bundle is missing,
/// malformed, or if an illegal state transition is computed.
pub fn update_state_space(
    mut state_space: StateSpace,
    work_queue: &WorkQueue,
    run_summary: &RunSummary,
    gate_decision: &GateDecision,
    promotion_decision: &PromotionDecision,
) -> Result<StateSpace, StateWriterError> {
    let deps_by_task: BTreeMap<TaskId, Vec<TaskId>> = work_queue
        .tasks
        .iter()
        .map(|task| (task.task_id.clone(), task.dependencies.iter().cloned().collect()))
        .collect();

    let mut work_items = Vec::with_capacity(run_summary.results.len());
    for entry in &run_summary.results {
        let result = &entry.result;
        let task_id = result.task_id.clone();
        let evidence = load_and_validate_evidence(&task_id, &result.evidence_bundle_path)?;

        let approved = promotion_decision.decision == GateStatus::Approve
            && result.status == taskgate_core::AttemptStatus::Pass;

        let claimed = require_ok(&task_id, apply_transition(TaskState::Queued, TaskSignal::Claim))?;
        let running = require_ok(&task_id, apply_transition(claimed, TaskSignal::Run))?;
        let gate_signal = if approved { TaskSignal::GatePass } else { TaskSignal::GateFail };
        let mut final_state = require_ok(&task_id, apply_transition(running, gate_signal))?;
        if approved {
            final_state = require_ok(&task_id, apply_transition(final_state, TaskSignal::GatePass))?;
        }

        let gate_status = if approved { TaskState::Done } else { TaskState::Blocked };
        let reason_code = if approved {
            None
        } else {
            Some(
                promotion_decision
                    .reason_codes
                    .first()
                    .cloned()
                    .unwrap_or_else(|| taskgate_core::reason_code::POLICY_NEEDS_HUMAN.to_string()),
            )
        };
        let notes = (!gate_decision.notes.is_empty()).then(|| gate_decision.notes.join("; "));

        work_items.push(WorkItem {
            work_id: task_id.clone(),
            status: final_state,
            node: WorkItemNode {
                reqs: Vec::new(),
                deps: deps_by_task.get(&task_id).cloned().unwrap_or_default(),
                provs: vec!["telemetry".to_string()],
                assertions: vec!["gate_passes".to_string()],
            },
            telemetry: evidence,
            gate: WorkItemGate {
                status: gate_status,
                reason_code,
                notes,
            },
        });
    }

    state_space.work_items = work_items;
    Ok(state_space)
}

/// Reconstructs the run summary purely from the durable event log's
/// `task.result` events (keeping only the latest payload per task) and folds
/// it through [`update_state_space`]. Independent of the on-disk `summary.json`;
/// for a given run, this must agree with [`update_state_space`] applied to the
/// written summary.
///
/// # Errors
///
/// Returns [`StateWriterError`] if the event log cannot be read or parsed, or
/// under the same conditions as [`update_state_space`].
pub fn replay_state_space_from_events(
    state_space: StateSpace,
    work_queue: &WorkQueue,
    event_log: &Path,
    run_id: &str,
    gate_decision: &GateDecision,
    promotion_decision: &PromotionDecision,
) -> Result<StateSpace, StateWriterError> {
    let events = load_envelopes(event_log, Some(run_id))?;
    let mut latest: BTreeMap<TaskId, PersistedTaskResult> = BTreeMap::new();
    for event in events {
        if event.topic != topics::TASK_RESULT {
            continue;
        }
        let task_id = TaskId::new(event.payload["task_id"].as_str().unwrap_or_default());
        let status: AttemptStatus =
            serde_json::from_value(event.payload["status"].clone()).unwrap_or(AttemptStatus::Fail);
        let evidence_bundle_path = event.payload["evidence_bundle_path"].as_str().unwrap_or_default().to_string();
        latest.insert(
            task_id.clone(),
            PersistedTaskResult {
                result: taskgate_core::TaskResult {
                    task_id,
                    status,
                    attempts: 0,
                    attempt_history: Vec::new(),
                    retry_backoff_ms: Vec::new(),
                    reason_code: None,
                    worker_model: String::new(),
                    transient: None,
                    evidence_bundle_path,
                    attempt_history_path: String::new(),
                    dlq_path: None,
                },
                task_result_path: String::new(),
            },
        );
    }

    let run_summary = RunSummary {
        run_id: run_id.to_string(),
        dispatched_count: latest.len(),
        results: latest.into_values().collect(),
    };

    update_state_space(state_space, work_queue, &run_summary, gate_decision, promotion_decision)
}

fn require_ok(task_id: &TaskId, result: taskgate_core::TransitionResult) -> Result<TaskState, StateWriterError> {
    if result.is_ok() {
        Ok(result.next_state)
    } else {
        Err(StateWriterError::IllegalTransition {
            task_id: task_id.to_string(),
            reason_code: result.reason_code.unwrap_or_default(),
        })
    }
}

fn load_and_validate_evidence(task_id: &TaskId, path: &str) -> Result<EvidenceBundle, StateWriterError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StateWriterError::MissingEvidence {
        task_id: task_id.to_string(),
        path: path.to_string(),
    })?;
    let evidence: EvidenceBundle =
        serde_json::from_str(&contents).map_err(|_| StateWriterError::MissingEvidence {
            task_id: task_id.to_string(),
            path: path.to_string(),
        })?;
    evidence
        .validate()
        .map_err(|source| StateWriterError::InvalidEvidence {
            task_id: task_id.to_string(),
            source,
        })?;
    Ok(evidence)
}

// ============================================================================
// SECTION: Substrate Layout
// ============================================================================

/// Directories every run's substrate-compatibility layout must carry,
/// mirroring the orchestrator's `REQUIRED_DIRS`.
pub mod substrate {
    use std::path::Path;
    use std::path::PathBuf;

    /// Directories created under `<run_root>/<run_id>/substrate/`.
    pub const REQUIRED_DIRS: &[&str] = &["queue", "out", "locks", "promote", "worktrees", "ledger"];

    /// Creates every required substrate directory for `run_id` under
    /// `run_root`, returning the substrate base directory.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if a directory cannot be created.
    pub fn ensure_substrate_layout(run_root: &Path, run_id: &str) -> std::io::Result<PathBuf> {
        let base = run_root.join(run_id).join("substrate");
        for rel in REQUIRED_DIRS {
            std::fs::create_dir_all(base.join(rel))?;
        }
        Ok(base)
    }
}
