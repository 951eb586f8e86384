// taskgate-pipeline/src/harness.rs
// ============================================================================
// Module: Taskgate Implementer Harness
// Description: Retries transient worker failures with jittered exponential
// backoff, then persists attempts, results, evidence, and dead letters.
// Purpose: Turn a single raw worker call into a durable, replayable
// per-task record.
// Dependencies: taskgate-core, taskgate-eventbus, rand
// ============================================================================

//! ## Overview
//! Two layers, mirroring the orchestrator's `RetryingWorker` /
//! `ImplementerHarness` split: [`RetryingWorker`] wraps a single-attempt
//! [`RawWorkerFn`] with retry and backoff, producing a complete
//! [`TaskResult`]; [`ImplementerHarness`] drives a
//! [`crate::dispatcher::DispatcherSupervisor`] over that wrapped worker and
//! persists the run's artifact layout under `<run_root>/<run_id>/`.
//!
//! The backoff formula itself has no precedent in the original worker (which
//! retries immediately with no delay); jittered exponential backoff is this
//! implementation's own addition, seeded deterministically per `(task_id,
//! attempt)` so a replayed run computes the same delays.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use taskgate_core::AttemptRecord;
use taskgate_core::AttemptStatus;
use taskgate_core::AtomicWriteError;
use taskgate_core::AuditEvent;
use taskgate_core::AuditSink;
use taskgate_core::EvidenceArtifact;
use taskgate_core::EvidenceBundle;
use taskgate_core::NoopAuditSink;
use taskgate_core::OtelRef;
use taskgate_core::RunId;
use taskgate_core::Task;
use taskgate_core::TaskResult;
use taskgate_core::WorkQueue;
use taskgate_core::atomic_write_json;
use taskgate_core::hash_bytes;
use taskgate_core::is_transient;
use taskgate_core::reason_code::EXEC_NONZERO_EXIT;
use taskgate_core::security::redact_sensitive_payload;
use taskgate_eventbus::EventBus;

use crate::dispatcher::DispatchError;
use crate::dispatcher::DispatcherSupervisor;
use crate::dispatcher::WorkerFn;

// ============================================================================
// SECTION: Raw Worker Outcome
// ============================================================================

/// The outcome of a single, unretried worker invocation.
#[derive(Debug, Clone)]
pub struct RawOutcome {
    /// Outcome of this single attempt.
    pub status: AttemptStatus,
    /// Reason code, when the attempt failed.
    pub reason_code: Option<String>,
    /// Free-form diagnostic notes.
    pub notes: Option<String>,
    /// Worker model that produced this attempt.
    pub worker_model: String,
    /// Attempt duration in milliseconds.
    pub duration_ms: u64,
    /// Whether this failure is transient and should be retried.
    pub transient: bool,
}

/// A single-attempt worker function, wrapped by [`RetryingWorker`] before
/// being handed to a [`DispatcherSupervisor`].
pub type RawWorkerFn = Arc<dyn Fn(&Task) -> RawOutcome + Send + Sync>;

// ============================================================================
// SECTION: Retry Policy & Backoff
// ============================================================================

/// Retry and backoff policy for [`RetryingWorker`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff in milliseconds (before exponentiation/jitter).
    pub base_backoff_ms: u64,
    /// Maximum backoff in milliseconds, regardless of attempt count.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

/// Computes the jittered exponential backoff to apply before retrying
/// attempt `completed_attempt + 1`: `min(base * 2^(completed_attempt - 1),
/// max) * jitter`, with `jitter` drawn from a PRNG deterministically seeded
/// on `"{task_id}:{completed_attempt}"`.
#[must_use]
pub fn jittered_backoff_ms(policy: RetryPolicy, task_id: &str, completed_attempt: u32) -> u64 {
    let seed_key = format!("{task_id}:{completed_attempt}");
    let digest = hash_bytes(seed_key.as_bytes());
    let seed = u64::from_str_radix(&digest[..16], 16).unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(seed);
    let jitter = 1.0 + rng.gen_range(0.0..0.2);
    let exponent = completed_attempt.saturating_sub(1);
    let base_component = policy.base_backoff_ms.saturating_mul(2u64.saturating_pow(exponent));
    let bounded = base_component.min(policy.max_backoff_ms);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        reason = "bounded by max_backoff_ms, itself a small configured u64"
    )]
    let jittered = (bounded as f64 * jitter) as u64;
    jittered
}

// ============================================================================
// SECTION: Retrying Worker
// ============================================================================

/// Wraps a [`RawWorkerFn`] with retry-on-transient-failure and jittered
/// backoff, producing the complete [`TaskResult`] a dispatcher expects.
pub struct RetryingWorker {
    raw: RawWorkerFn,
    policy: RetryPolicy,
}

impl RetryingWorker {
    /// Builds a retrying wrapper around `raw` using `policy`.
    #[must_use]
    pub fn new(raw: RawWorkerFn, policy: RetryPolicy) -> Self {
        Self { raw, policy }
    }

    /// Runs `task` to completion, retrying transient failures per `policy`.
    #[must_use]
    pub fn call(&self, task: &Task) -> TaskResult {
        let mut attempt_number = 0u32;
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut backoffs: Vec<u64> = Vec::new();
        let mut last_outcome;

        loop {
            attempt_number += 1;
            if attempt_number > 1 {
                let backoff = jittered_backoff_ms(self.policy, task.task_id.as_str(), attempt_number - 1);
                backoffs.push(backoff);
                std::thread::sleep(Duration::from_millis(backoff));
            }

            let started = Instant::now();
            let outcome = (self.raw)(task);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "a single worker attempt never runs long enough to overflow u64 millis"
            )]
            let duration_ms = started.elapsed().as_millis() as u64;

            history.push(AttemptRecord {
                attempt: attempt_number,
                status: outcome.status,
                reason_code: outcome.reason_code.clone(),
                notes: outcome.notes.clone(),
                duration_ms,
                backoff_ms: backoffs.last().copied(),
            });
            last_outcome = outcome;

            let is_transient_failure = last_outcome.status == AttemptStatus::Fail
                && (last_outcome.transient
                    || last_outcome.reason_code.as_deref().is_some_and(is_transient));
            if !is_transient_failure || attempt_number > self.policy.max_retries {
                break;
            }
        }

        TaskResult {
            task_id: task.task_id.clone(),
            status: last_outcome.status,
            attempts: attempt_number,
            attempt_history: history,
            retry_backoff_ms: backoffs,
            reason_code: last_outcome.reason_code,
            worker_model: last_outcome.worker_model,
            transient: Some(last_outcome.transient),
            evidence_bundle_path: String::new(),
            attempt_history_path: String::new(),
            dlq_path: None,
        }
    }

    /// Adapts this worker into the [`WorkerFn`] shape a
    /// [`DispatcherSupervisor`] expects.
    #[must_use]
    pub fn into_worker_fn(self: Arc<Self>) -> WorkerFn {
        let this = self;
        Arc::new(move |task: &Task| this.call(task))
    }
}

// ============================================================================
// SECTION: Implementer Harness
// ============================================================================

/// Errors raised running an [`ImplementerHarness`].
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Dispatching the work queue failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Persisting a run artifact failed.
    #[error(transparent)]
    Write(#[from] AtomicWriteError),
    /// Publishing a result event to the bus failed.
    #[error(transparent)]
    Bus(#[from] taskgate_eventbus::EventBusError),
}

/// Persisted, per-task record returned by [`ImplementerHarness::run`],
/// mirroring the orchestrator's `task_records` shape.
#[derive(Debug, Clone, Serialize)]
pub struct PersistedTaskResult {
    /// The underlying task result.
    #[serde(flatten)]
    pub result: TaskResult,
    /// Path to the raw `*.result.json` file.
    pub task_result_path: String,
}

/// Aggregate summary persisted at `<run_root>/<run_id>/summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// The dispatched run's identifier.
    pub run_id: String,
    /// Number of tasks whose results were persisted.
    pub dispatched_count: usize,
    /// Every persisted task result, in work-queue order.
    pub results: Vec<PersistedTaskResult>,
}

/// Runs a dispatcher-supervised [`RetryingWorker`] over a work queue and
/// persists the full run artifact layout (`spec` §4.7).
pub struct ImplementerHarness {
    bus: Arc<EventBus>,
    run_root: PathBuf,
    dispatcher: DispatcherSupervisor,
    audit_sink: Arc<dyn AuditSink>,
}

impl ImplementerHarness {
    /// Builds a harness publishing onto `bus`, persisting under `run_root`,
    /// dispatching to `worker_fn` wrapped with `retry_policy`. Audit events
    /// are discarded; use [`Self::with_audit_sink`] to record them.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyWorkerModels`] if `worker_models` is empty.
    pub fn new(
        bus: Arc<EventBus>,
        run_root: impl Into<PathBuf>,
        worker_models: Vec<String>,
        raw_worker_fn: RawWorkerFn,
        retry_policy: RetryPolicy,
    ) -> Result<Self, DispatchError> {
        let retrying = Arc::new(RetryingWorker::new(raw_worker_fn, retry_policy));
        let dispatcher =
            DispatcherSupervisor::new(Arc::clone(&bus), worker_models, retrying.into_worker_fn())?;
        Ok(Self {
            bus,
            run_root: run_root.into(),
            dispatcher,
            audit_sink: Arc::new(NoopAuditSink),
        })
    }

    /// Replaces the audit sink used to record one event per persisted task
    /// result.
    #[must_use]
    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    /// Dispatches `work_queue`, then persists `work.queue.json`, per-task
    /// results, attempt histories, evidence bundles, dead letters for
    /// exhausted transient failures, and an aggregate `summary.json`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] if dispatch or any persist step fails.
    pub async fn run(&self, work_queue: &WorkQueue) -> Result<RunSummary, HarnessError> {
        let summary = self.dispatcher.dispatch(work_queue).await?;
        let run_id = summary.run_id.clone();
        let run_dir = self.run_root.join(run_id.as_str());
        let task_dir = run_dir.join("task_results");
        let attempt_dir = run_dir.join("attempts");
        let evidence_dir = run_dir.join("evidence");
        let dlq_dir = run_dir.join("dlq");

        atomic_write_json(&run_dir.join("work.queue.json"), work_queue)?;

        let mut persisted = Vec::with_capacity(summary.results.len());
        for mut result in summary.results {
            let task_result_path = task_dir.join(format!("{}.result.json", result.task_id));
            let attempt_path = attempt_dir.join(format!("{}.attempts.json", result.task_id));
            atomic_write_json(&attempt_path, &result.attempt_history)?;

            let evidence_path = evidence_dir.join(format!("{}.evidence.bundle.telemetry.json", result.task_id));
            let evidence = build_evidence_bundle(&run_id, &result, &task_result_path, &attempt_path);
            atomic_write_json(&evidence_path, &evidence)?;

            result.evidence_bundle_path = path_to_string(&evidence_path);
            result.attempt_history_path = path_to_string(&attempt_path);

            if result.status == AttemptStatus::Fail
                && result.transient == Some(true)
                && result.attempts > 1
            {
                let dlq_path = dlq_dir.join(format!("{}.dlq.json", result.task_id));
                atomic_write_json(&dlq_path, &result)?;
                result.dlq_path = Some(path_to_string(&dlq_path));
            }

            atomic_write_json(&task_result_path, &result)?;

            self.bus.publish(EventBus::new_event(
                taskgate_core::model::topics::TASK_RESULT,
                run_id.clone(),
                serde_json::json!({
                    "task_id": result.task_id.to_string(),
                    "status": result.status,
                    "attempts": result.attempts,
                    "evidence_bundle_path": result.evidence_bundle_path,
                }),
            ))?;

            let audit_payload = redact_sensitive_payload(&serde_json::json!({
                "status": result.status,
                "attempts": result.attempts,
                "reason_code": result.reason_code,
            }));
            self.audit_sink.record(
                &AuditEvent::new("harness", "task_result_persisted", audit_payload)
                    .with_run_id(run_id.to_string())
                    .with_task_id(result.task_id.to_string()),
            );

            persisted.push(PersistedTaskResult {
                task_result_path: path_to_string(&task_result_path),
                result,
            });
        }

        let run_summary = RunSummary {
            run_id: run_id.to_string(),
            dispatched_count: persisted.len(),
            results: persisted,
        };
        atomic_write_json(&run_dir.join("summary.json"), &run_summary)?;
        Ok(run_summary)
    }
}

/// Builds the evidence bundle for a single task result, using the
/// deterministic `local-mvp`-style placeholder telemetry reference (a live
/// span is substituted by the checker when OpenTelemetry is configured).
fn build_evidence_bundle(
    run_id: &RunId,
    result: &TaskResult,
    task_result_path: &Path,
    attempt_path: &Path,
) -> EvidenceBundle {
    let signals = redact_sensitive_payload(&serde_json::json!({
        "run.id": run_id.to_string(),
        "task.id": result.task_id.to_string(),
        "task.status": result.status,
        "task.attempts": result.attempts,
        "task.reason_code": result.reason_code,
        "task.worker_model": result.worker_model,
    }));
    EvidenceBundle {
        otel: OtelRef {
            backend: "local-mvp".to_string(),
            trace_id_hex: "0".repeat(32),
            span_id_hex: "0".repeat(16),
            project: "taskgate".to_string(),
            run_id: run_id.clone(),
        },
        signals,
        artifacts: [task_result_path, attempt_path]
            .into_iter()
            .filter_map(|path| artifact_for(path))
            .collect(),
    }
}

/// Builds an [`EvidenceArtifact`] for a file that was just written, or
/// `None` if it could not be stat'd (should not happen immediately after an
/// atomic write, but persistence must not panic on a racing deletion).
fn artifact_for(path: &Path) -> Option<EvidenceArtifact> {
    let bytes = std::fs::read(path).ok()?;
    Some(EvidenceArtifact {
        path: path_to_string(path),
        sha256: hash_bytes(&bytes),
        bytes: bytes.len() as u64,
    })
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Dead-letter listing, mirroring the reprocessing utility's worklist shape.
pub mod dlq {
    use serde::Deserialize;
    use serde::Serialize;
    use taskgate_core::TaskResult;

    /// One entry in a [`DlqWorklist`].
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DlqWorklistEntry {
        /// Path to the dead-letter record.
        pub path: String,
        /// The affected task's identifier.
        pub task_id: String,
        /// The task's final reason code, if any.
        pub reason_code: Option<String>,
        /// Number of attempts made before exhaustion.
        pub attempts: u32,
        /// Fixed next action: every dead-lettered task requires manual review.
        pub action: &'static str,
    }

    /// Aggregate worklist returned by [`list_dlq_entries`].
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DlqWorklist {
        /// The run these entries belong to.
        pub run_id: String,
        /// Number of entries found.
        pub dlq_count: usize,
        /// The entries themselves, sorted by path.
        pub entries: Vec<DlqWorklistEntry>,
    }

    /// Lists every `*.dlq.json` record under `<run_root>/<run_id>/dlq`,
    /// mirroring the reprocessing utility's glob-and-summarize pass.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the directory cannot be read (a
    /// run with no dead letters yet returns an empty worklist, not an error).
    pub fn list_dlq_entries(run_root: &std::path::Path, run_id: &str) -> std::io::Result<DlqWorklist> {
        let dlq_dir = run_root.join(run_id).join("dlq");
        let mut entries = Vec::new();
        if dlq_dir.is_dir() {
            let mut paths: Vec<_> = std::fs::read_dir(&dlq_dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                .collect();
            paths.sort();
            for path in paths {
                let contents = std::fs::read_to_string(&path)?;
                let Ok(result) = serde_json::from_str::<TaskResult>(&contents) else {
                    continue;
                };
                entries.push(DlqWorklistEntry {
                    path: path.to_string_lossy().into_owned(),
                    task_id: result.task_id.to_string(),
                    reason_code: result.reason_code,
                    attempts: result.attempts,
                    action: "manual_review_required",
                });
            }
        }
        Ok(DlqWorklist {
            run_id: run_id.to_string(),
            dlq_count: entries.len(),
            entries,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use taskgate_core::TaskId;
    use taskgate_core::TaskStatus;
    use tempfile::tempdir;

    use super::*;

    fn task(id: &str) -> Task {
        Task {
            task_id: TaskId::new(id),
            goal: "goal".to_string(),
            status: TaskStatus::Queued,
            dependencies: Default::default(),
            worker_model: Some("model-a".to_string()),
            priority: None,
            created_at: None,
            payload_digest: None,
            requested_method: None,
            tool_contract: None,
            spawn_spec: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn retries_transient_failure_until_it_passes() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let raw: RawWorkerFn = Arc::new(move |t: &Task| {
            let call = calls_clone.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                RawOutcome {
                    status: AttemptStatus::Fail,
                    reason_code: Some("TRANSIENT.NETWORK".to_string()),
                    notes: None,
                    worker_model: t.worker_model.clone().unwrap_or_default(),
                    duration_ms: 1,
                    transient: true,
                }
            } else {
                RawOutcome {
                    status: AttemptStatus::Pass,
                    reason_code: None,
                    notes: None,
                    worker_model: t.worker_model.clone().unwrap_or_default(),
                    duration_ms: 1,
                    transient: false,
                }
            }
        });
        let worker = RetryingWorker::new(
            raw,
            RetryPolicy {
                max_retries: 2,
                base_backoff_ms: 1,
                max_backoff_ms: 5,
            },
        );
        let result = worker.call(&task("a"));
        assert_eq!(result.status, AttemptStatus::Pass);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.attempt_history.len(), 2);
        assert_eq!(result.retry_backoff_ms.len(), 1);
    }

    #[test]
    fn stops_retrying_a_non_transient_failure_immediately() {
        let raw: RawWorkerFn = Arc::new(|t: &Task| RawOutcome {
            status: AttemptStatus::Fail,
            reason_code: Some(EXEC_NONZERO_EXIT.to_string()),
            notes: None,
            worker_model: t.worker_model.clone().unwrap_or_default(),
            duration_ms: 1,
            transient: false,
        });
        let worker = RetryingWorker::new(raw, RetryPolicy::default());
        let result = worker.call(&task("a"));
        assert_eq!(result.attempts, 1);
    }

    #[test]
    fn exhausts_retries_and_reports_final_failure() {
        let raw: RawWorkerFn = Arc::new(|t: &Task| RawOutcome {
            status: AttemptStatus::Fail,
            reason_code: Some("TRANSIENT.TIMEOUT".to_string()),
            notes: None,
            worker_model: t.worker_model.clone().unwrap_or_default(),
            duration_ms: 1,
            transient: true,
        });
        let worker = RetryingWorker::new(
            raw,
            RetryPolicy {
                max_retries: 1,
                base_backoff_ms: 1,
                max_backoff_ms: 2,
            },
        );
        let result = worker.call(&task("a"));
        assert_eq!(result.attempts, 2);
        assert_eq!(result.status, AttemptStatus::Fail);
    }

    #[test]
    fn backoff_is_deterministic_for_the_same_task_and_attempt() {
        let first = jittered_backoff_ms(RetryPolicy::default(), "task-a", 1);
        let second = jittered_backoff_ms(RetryPolicy::default(), "task-a", 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn harness_persists_run_layout() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(EventBus::new(None).unwrap());
        let raw: RawWorkerFn = Arc::new(|t: &Task| RawOutcome {
            status: AttemptStatus::Pass,
            reason_code: None,
            notes: None,
            worker_model: t.worker_model.clone().unwrap_or_default(),
            duration_ms: 1,
            transient: false,
        });
        let harness = ImplementerHarness::new(
            bus,
            dir.path(),
            vec!["model-a".to_string()],
            raw,
            RetryPolicy::default(),
        )
        .unwrap();
        let queue = WorkQueue {
            version: "dome.work.queue/v0.2".to_string(),
            run_id: taskgate_core::RunId::new("run-1"),
            base_ref: "main".to_string(),
            max_workers: 1,
            tasks: vec![task("a")],
        };
        let summary = harness.run(&queue).await.unwrap();
        assert_eq!(summary.dispatched_count, 1);
        assert!(dir.path().join("run-1/work.queue.json").exists());
        assert!(dir.path().join("run-1/task_results/a.result.json").exists());
        assert!(dir.path().join("run-1/evidence/a.evidence.bundle.telemetry.json").exists());
        assert!(dir.path().join("run-1/summary.json").exists());
    }

    #[test]
    fn dlq_listing_is_empty_for_a_run_with_no_dead_letters() {
        let dir = tempdir().unwrap();
        let worklist = dlq::list_dlq_entries(dir.path(), "run-1").unwrap();
        assert_eq!(worklist.dlq_count, 0);
    }
}
