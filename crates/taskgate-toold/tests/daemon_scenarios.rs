// taskgate-toold/tests/daemon_scenarios.rs
// ============================================================================
// Module: Tool Daemon Scenario Tests
// Description: Cross-module coverage of the job store's idempotency,
// stream-resume, and built-in-skill lifecycle behavior, against both the
// in-memory and SQLite-backed stores.
// Purpose: Exercise StateStore the way ToolDaemon actually drives it,
// independent of the HTTP layer.
// Dependencies: taskgate-toold, tempfile
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

use taskgate_toold::InMemoryStateStore;
use taskgate_toold::JobRecord;
use taskgate_toold::JobState;
use taskgate_toold::SqliteStateConfig;
use taskgate_toold::SqliteStateStore;
use taskgate_toold::StateStore;
use taskgate_toold::run_builtin_skill;

fn job(job_id: &str, idempotency_key: &str, request_hash: &str) -> JobRecord {
    JobRecord {
        job_id: job_id.to_string(),
        run_id: format!("run-{job_id}"),
        state: JobState::Queued,
        skill_id: "job.log".to_string(),
        profile: "default".to_string(),
        idempotency_key: idempotency_key.to_string(),
        request_hash: request_hash.to_string(),
        artifacts: Vec::new(),
        events: Vec::new(),
        updated_at_epoch: 0.0,
    }
}

/// Builds one store per backend, keeping the SQLite backend's temp
/// directory alive for as long as the returned stores are in scope.
fn stores() -> (tempfile::TempDir, Vec<(&'static str, Box<dyn StateStore>)>) {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteStateStore::new(SqliteStateConfig { path: dir.path().join("state.sqlite3"), busy_timeout_ms: 1000 }).unwrap();
    let backends: Vec<(&'static str, Box<dyn StateStore>)> =
        vec![("in_memory", Box::new(InMemoryStateStore::new())), ("sqlite", Box::new(sqlite))];
    (dir, backends)
}

#[test]
fn idempotency_conflict_rejects_a_reused_key_with_a_different_payload() {
    let (_dir, backends) = stores();
    for (backend, store) in backends {
        let (first, replay) = store.submit(job("job-1", "idem-conflict", "hash-a"), "client-1").unwrap();
        assert!(!replay, "backend {backend}");
        assert_eq!(first.job_id, "job-1", "backend {backend}");

        let err = store.submit(job("job-2", "idem-conflict", "hash-b"), "client-1").unwrap_err();
        assert!(
            matches!(err, taskgate_toold::StateStoreError::IdempotencyKeyReused),
            "backend {backend}: expected idempotency key reused, got {err:?}"
        );
    }
}

#[test]
fn idempotency_replay_returns_the_original_job_for_a_matching_payload() {
    let (_dir, backends) = stores();
    for (backend, store) in backends {
        let (first, replay) = store.submit(job("job-1", "idem-replay", "hash-a"), "client-1").unwrap();
        assert!(!replay, "backend {backend}");

        let (replayed, replay) = store.submit(job("job-2", "idem-replay", "hash-a"), "client-1").unwrap();
        assert!(replay, "backend {backend}");
        assert_eq!(replayed.job_id, first.job_id, "backend {backend}");
    }
}

#[test]
fn stream_resume_returns_only_events_strictly_after_since_seq() {
    let (_dir, backends) = stores();
    for (backend, store) in backends {
        let (stored, _) = store.submit(job("job-1", "idem-stream", "hash-a"), "client-1").unwrap();
        run_builtin_skill(store.as_ref(), &stored.job_id, "job.log", &serde_json::json!({"lines": ["a", "b", "c"]})).unwrap();

        let first_page = store.events_since(&stored.job_id, 0).unwrap();
        assert!(first_page.len() >= 2, "backend {backend}: expected at least two events, got {first_page:?}");

        let resume_from = first_page[1].seq;
        let second_page = store.events_since(&stored.job_id, resume_from).unwrap();
        assert!(
            second_page.iter().all(|event| event.seq > resume_from),
            "backend {backend}: resumed page must be strictly later than seq {resume_from}, got {second_page:?}"
        );
        assert!(!second_page.is_empty(), "backend {backend}: resuming mid-stream must still return later events");
    }
}

#[test]
fn job_log_runs_to_completion_and_terminal_transition_is_rejected() {
    let (_dir, backends) = stores();
    for (backend, store) in backends {
        let (stored, _) = store.submit(job("job-1", "idem-terminal", "hash-a"), "client-1").unwrap();
        run_builtin_skill(store.as_ref(), &stored.job_id, "job.log", &serde_json::json!({"lines": ["only"]})).unwrap();

        let final_job = store.get(&stored.job_id).unwrap();
        assert_eq!(final_job.state, JobState::Succeeded, "backend {backend}");

        let err = store.transition(&stored.job_id, JobState::Running).unwrap_err();
        assert!(
            matches!(err, taskgate_toold::StateStoreError::TerminalTransition(JobState::Succeeded, JobState::Running)),
            "backend {backend}: expected terminal transition rejection, got {err:?}"
        );
    }
}

#[test]
fn job_fail_sentinel_transitions_to_failed_with_an_error_event() {
    let (_dir, backends) = stores();
    for (backend, store) in backends {
        let (stored, _) = store.submit(job("job-1", "idem-fail", "hash-a"), "client-1").unwrap();
        run_builtin_skill(store.as_ref(), &stored.job_id, "job.fail", &serde_json::json!({})).unwrap();

        let final_job = store.get(&stored.job_id).unwrap();
        assert_eq!(final_job.state, JobState::Failed, "backend {backend}");
        assert!(
            final_job.events.iter().any(|event| event.event_type == "error"),
            "backend {backend}: job.fail must append an error event"
        );
    }
}
