// taskgate-memory/src/materializer.rs
// ============================================================================
// Module: Run Materializer
// Description: Folds finished run directories into the fact store,
// tracking progress with a checkpoint file so a restart resumes rather
// than re-processes everything.
// Purpose: Turn per-run JSON artifacts into query-friendly fact rows.
// Dependencies: crate::{checkpoint, store}, taskgate-core, taskgate-eventbus,
// taskgate-run
// ============================================================================

//! ## Overview
//! [`run_once`] discovers run directories under a root, diffs them against
//! a checkpoint, and for each new run loads `work.queue.json`,
//! `summary.json`, `gate/gate.decision.json`, `promotion/promotion.decision.json`,
//! `run.manifest.json`, and `events.jsonl`, normalizing them into
//! `run_fact`, `task_fact`, and `event_fact` upserts. [`run_loop`] repeats
//! this on a poll interval; [`run_once`] alone is what a `--once` CLI
//! invocation calls.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use taskgate_core::AuditEvent;
use taskgate_core::AuditSink;
use taskgate_core::NoopAuditSink;
use taskgate_core::model::GateDecision;
use taskgate_core::model::PromotionDecision;
use taskgate_core::model::WorkQueue;
use taskgate_eventbus::load_envelopes;
use taskgate_run::manifest::RunManifest;

use crate::checkpoint::Checkpoint;
use crate::checkpoint::CheckpointError;
use crate::checkpoint::discover_runs;
use crate::checkpoint::load_checkpoint;
use crate::checkpoint::pending_runs;
use crate::checkpoint::save_checkpoint;
use crate::store::EventFact;
use crate::store::FactStore;
use crate::store::FactStoreError;
use crate::store::RunFact;
use crate::store::TaskFact;

/// Errors raised materializing runs into the fact store.
#[derive(Debug, thiserror::Error)]
pub enum MaterializerError {
    /// Checkpoint load/save failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    /// A fact store write failed.
    #[error(transparent)]
    Store(#[from] FactStoreError),
}

/// Configuration for one materialization pass.
#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    /// Root directory containing one subdirectory per run.
    pub run_root: PathBuf,
    /// Path to the checkpoint file tracking processed run ids.
    pub checkpoint_path: PathBuf,
}

/// Loads whichever of a run directory's optional JSON artifacts exist, and
/// folds them into a [`RunFact`] plus the [`TaskFact`]/[`EventFact`] rows
/// derived from its work queue, summary, and event log.
struct RunArtifacts {
    run_fact: RunFact,
    task_facts: Vec<TaskFact>,
    event_facts: Vec<EventFact>,
}

fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    std::fs::read_to_string(path).ok().and_then(|raw| serde_json::from_str(&raw).ok()).unwrap_or_default()
}

fn gate_status_label(status: taskgate_core::status::GateStatus) -> String {
    serde_json::to_value(status).ok().and_then(|value| value.as_str().map(str::to_string)).unwrap_or_else(|| "UNKNOWN".to_string())
}

fn substrate_status_label(status: taskgate_core::status::SubstrateStatus) -> String {
    serde_json::to_value(status).ok().and_then(|value| value.as_str().map(str::to_string)).unwrap_or_else(|| "UNKNOWN".to_string())
}

fn load_run_artifacts(run_id: &str, run_dir: &Path) -> RunArtifacts {
    let work_queue: WorkQueue = serde_json::from_str(
        &std::fs::read_to_string(run_dir.join("work.queue.json")).unwrap_or_else(|_| "{}".to_string()),
    )
    .unwrap_or_else(|_| WorkQueue { version: "0".to_string(), run_id: run_id.into(), base_ref: "unknown".to_string(), max_workers: 1, tasks: Vec::new() });

    let gate: Option<GateDecision> = std::fs::read_to_string(run_dir.join("gate").join("gate.decision.json"))
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok());
    let promotion: Option<PromotionDecision> =
        std::fs::read_to_string(run_dir.join("promotion").join("promotion.decision.json"))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());
    let manifest: Option<RunManifest> =
        std::fs::read_to_string(run_dir.join("run.manifest.json")).ok().and_then(|raw| serde_json::from_str(&raw).ok());

    let run_fact = RunFact {
        run_id: run_id.to_string(),
        base_ref: work_queue.base_ref.clone(),
        gate_status: gate.as_ref().map_or_else(|| "UNKNOWN".to_string(), |decision| gate_status_label(decision.status)),
        substrate_status: gate
            .as_ref()
            .map_or_else(|| "UNKNOWN".to_string(), |decision| substrate_status_label(decision.substrate_status)),
        promotion_decision: promotion
            .as_ref()
            .map_or_else(|| "UNKNOWN".to_string(), |decision| gate_status_label(decision.decision)),
        risk_score: gate.as_ref().map_or(0, |decision| decision.risk_score),
        confidence: gate.as_ref().map_or(0.0, |decision| decision.confidence),
        repo_commit_sha: manifest
            .as_ref()
            .and_then(|manifest| manifest.runtime_fingerprint.repo_commit.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        summary_path: path_str(&run_dir.join("summary.json")),
        state_space_path: path_str(&run_dir.join("state.space.json")),
    };

    let summary: serde_json::Value = read_json(&run_dir.join("summary.json"));
    let updated_ts = manifest.as_ref().map_or_else(String::new, |manifest| manifest.generated_at.clone());
    let task_facts = summary
        .get("results")
        .and_then(serde_json::Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|result| {
            let task_id = result.get("task_id")?.as_str()?.to_string();
            let status = result.get("status")?.as_str()?.to_string();
            Some(TaskFact {
                run_id: run_id.to_string(),
                task_id,
                status,
                failure_reason_code: result.get("reason_code").and_then(serde_json::Value::as_str).unwrap_or("").to_string(),
                policy_reason_code: String::new(),
                attempts: result.get("attempts").and_then(serde_json::Value::as_i64).unwrap_or(0),
                duration_ms: result
                    .get("attempt_history")
                    .and_then(serde_json::Value::as_array)
                    .and_then(|history| history.last())
                    .and_then(|attempt| attempt.get("duration_ms"))
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0),
                worker_model: result.get("worker_model").and_then(serde_json::Value::as_str).unwrap_or("unknown").to_string(),
                evidence_bundle_path: result.get("evidence_bundle_path").and_then(serde_json::Value::as_str).unwrap_or("").to_string(),
                updated_ts: updated_ts.clone(),
            })
        })
        .collect();

    let events = load_envelopes(&run_dir.join("events.jsonl"), Some(run_id)).unwrap_or_default();
    let event_facts = events
        .into_iter()
        .map(|event| EventFact {
            run_id: run_id.to_string(),
            event_id: event.event_id,
            topic: event.topic,
            sequence: i64::try_from(event.sequence).unwrap_or(i64::MAX),
            ts: event.ts,
            payload_json: serde_json::to_string(&event.payload).unwrap_or_default(),
        })
        .collect();

    RunArtifacts { run_fact, task_facts, event_facts }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Discovers pending runs under `config.run_root`, folds each into
/// `store`, and advances the checkpoint. Returns the number of runs
/// processed. A no-op (returns `0` without touching the fact store) when
/// nothing is pending. Audit events are discarded; use
/// [`run_once_with_audit`] to record them.
///
/// # Errors
///
/// Returns [`MaterializerError`] if the checkpoint cannot be loaded/saved
/// or a fact store write fails.
pub fn run_once(store: &FactStore, config: &MaterializerConfig) -> Result<usize, MaterializerError> {
    run_once_with_audit(store, config, &NoopAuditSink)
}

/// Like [`run_once`], recording one `run_materialized` audit event per
/// processed run to `audit_sink`.
///
/// # Errors
///
/// Returns [`MaterializerError`] if the checkpoint cannot be loaded/saved
/// or a fact store write fails.
pub fn run_once_with_audit(store: &FactStore, config: &MaterializerConfig, audit_sink: &dyn AuditSink) -> Result<usize, MaterializerError> {
    let mut checkpoint: Checkpoint = load_checkpoint(&config.checkpoint_path)?;
    let discovered = discover_runs(&config.run_root)?;
    let todo = pending_runs(&discovered, &checkpoint.processed_runs);
    if todo.is_empty() {
        return Ok(0);
    }

    for run_id in &todo {
        let artifacts = load_run_artifacts(run_id, &config.run_root.join(run_id));
        store.upsert_run_fact(&artifacts.run_fact)?;
        for task_fact in &artifacts.task_facts {
            store.upsert_task_fact(task_fact)?;
        }
        for event_fact in &artifacts.event_facts {
            store.upsert_event_fact(event_fact)?;
        }
        audit_sink.record(
            &AuditEvent::new(
                "materializer",
                "run_materialized",
                serde_json::json!({"gate_status": artifacts.run_fact.gate_status, "task_count": artifacts.task_facts.len()}),
            )
            .with_run_id(run_id.clone()),
        );
        checkpoint.mark_processed(run_id);
    }
    save_checkpoint(&config.checkpoint_path, &checkpoint)?;
    Ok(todo.len())
}

/// Repeats [`run_once_with_audit`] every `poll_interval` forever. Intended
/// for the long-running `memoryd` daemon mode; callers wanting a single
/// pass should call [`run_once`] directly instead.
///
/// # Errors
///
/// Returns [`MaterializerError`] if any pass fails; the loop does not
/// retry past the first error.
pub fn run_loop(store: &FactStore, config: &MaterializerConfig, poll_interval: Duration, audit_sink: &dyn AuditSink) -> Result<(), MaterializerError> {
    loop {
        run_once_with_audit(store, config, audit_sink)?;
        sleep(poll_interval);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn materializing_a_run_directory_upserts_run_and_task_facts() {
        let dir = tempfile::tempdir().unwrap();
        let run_root = dir.path().join("runs");
        let run_dir = run_root.join("run-1");
        write(
            &run_dir.join("work.queue.json"),
            r#"{"version":"1","run_id":"run-1","base_ref":"main","max_workers":1,"tasks":[]}"#,
        );
        write(
            &run_dir.join("gate").join("gate.decision.json"),
            r#"{"version":"1","run_id":"run-1","task_id":"wave-gate","status":"APPROVE","substrate_status":"PROMOTE",
               "reason_codes":[],"confidence":0.9,"risk_score":1,"notes":[],
               "telemetry_ref":{"trace_id_hex":"00000000000000000000000000000000","span_id_hex":"0000000000000000"}}"#,
        );
        write(
            &run_dir.join("summary.json"),
            r#"{"run_id":"run-1","dispatched_count":1,"results":[{"task_id":"task-a","status":"FAIL",
               "attempts":2,"attempt_history":[{"attempt":1,"status":"FAIL","duration_ms":120},
               {"attempt":2,"status":"FAIL","duration_ms":80}],"retry_backoff_ms":[10],
               "reason_code":"E_VERIFY_FAILED","worker_model":"worker-a","evidence_bundle_path":"evidence/task-a.json",
               "attempt_history_path":"history/task-a.json","task_result_path":"task_results/task-a.json"}]}"#,
        );

        let store = FactStore::open(&dir.path().join("memory.sqlite3")).unwrap();
        let config = MaterializerConfig { run_root, checkpoint_path: dir.path().join("checkpoint.json") };
        let processed = run_once(&store, &config).unwrap();
        assert_eq!(processed, 1);

        let run_fact = store.get_run_fact("run-1").unwrap().unwrap();
        assert_eq!(run_fact.gate_status, "APPROVE");
        assert_eq!(run_fact.base_ref, "main");

        let task_facts = store.all_task_facts().unwrap();
        assert_eq!(task_facts.len(), 1);
        assert_eq!(task_facts[0].status, "FAIL");
        assert_eq!(task_facts[0].duration_ms, 80);
    }

    #[test]
    fn a_second_pass_with_no_new_runs_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let run_root = dir.path().join("runs");
        write(&run_root.join("run-1").join("work.queue.json"), r#"{"version":"1","run_id":"run-1","base_ref":"main","max_workers":1,"tasks":[]}"#);
        let store = FactStore::open(&dir.path().join("memory.sqlite3")).unwrap();
        let config = MaterializerConfig { run_root, checkpoint_path: dir.path().join("checkpoint.json") };
        assert_eq!(run_once(&store, &config).unwrap(), 1);
        assert_eq!(run_once(&store, &config).unwrap(), 0);
    }
}
