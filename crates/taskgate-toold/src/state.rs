// taskgate-toold/src/state.rs
// ============================================================================
// Module: Taskgate Tool Daemon State Store
// Description: Thread-safe job/event store contract and its in-memory
// implementation, with an idempotency ledger and terminal-state guard.
// Purpose: Let `SkillExecute` calls replay safely and `StreamJobEvents`
// calls observe a job's append-only event history.
// Dependencies: taskgate-core
// ============================================================================

//! ## Overview
//! Mirrors `RuntimeStateStore`: one mutex guards an in-process job table and
//! an idempotency ledger keyed by `(client_id, idempotency_key)`. A second,
//! durable implementation lives in [`crate::sqlite_state`] behind the same
//! [`StateStore`] trait.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

/// Job states a [`JobRecord`] may occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, not yet started.
    Queued,
    /// Actively executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Canceled before completion.
    Canceled,
}

impl JobState {
    /// Whether this state is terminal (no further transitions allowed).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// One event appended to a job's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number within the job, starting at 1.
    pub seq: u64,
    /// The event's kind (`state_change`, `log`, `guard`, `error`).
    pub event_type: String,
    /// Arbitrary event payload.
    pub payload: serde_json::Value,
    /// Unix epoch seconds the event was recorded at.
    pub ts_epoch: f64,
}

/// A submitted unit of work and its full event history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// The job's identifier (`job-<12hex>`).
    pub job_id: String,
    /// The run this job belongs to (`run-<12hex>`).
    pub run_id: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// The skill identifier this job executes.
    pub skill_id: String,
    /// The profile the request was issued under.
    pub profile: String,
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
    /// Canonical hash of the request payload, used to detect idempotency-key
    /// reuse with a different request.
    pub request_hash: String,
    /// Artifact paths the job produced, if any.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// The job's event history.
    #[serde(default)]
    pub events: Vec<EventRecord>,
    /// Unix epoch seconds this job was last updated, used by [`StateStore::gc`].
    pub updated_at_epoch: f64,
}

/// Errors raised by a [`StateStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    /// The referenced job does not exist.
    #[error("job not found: {0}")]
    NotFound(String),
    /// The idempotency key was reused with a different request payload.
    #[error("idempotency key reused with different request hash")]
    IdempotencyKeyReused,
    /// The job is in a terminal state and cannot transition further.
    #[error("terminal job cannot transition: {0:?} -> {1:?}")]
    TerminalTransition(JobState, JobState),
    /// The store's internal lock was poisoned by a panicked holder.
    #[error("state store lock poisoned")]
    LockPoisoned,
    /// A durable backend's underlying I/O or database call failed.
    #[error("state store backend error: {0}")]
    Backend(String),
}

/// Thread-safe job/event store, identical contract for every backend.
pub trait StateStore: Send + Sync {
    /// Submits `job` under `client_id`. Returns `(stored_job, replay)`: when
    /// `(client_id, job.idempotency_key)` was seen before with the same
    /// `request_hash`, replays the stored job; with a different hash, fails.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::IdempotencyKeyReused`] on a hash mismatch.
    fn submit(&self, job: JobRecord, client_id: &str) -> Result<(JobRecord, bool), StateStoreError>;

    /// Looks up a job by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::NotFound`] if no such job exists.
    fn get(&self, job_id: &str) -> Result<JobRecord, StateStoreError>;

    /// Transitions a non-terminal job to `to_state`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::TerminalTransition`] if the job is already
    /// terminal, or [`StateStoreError::NotFound`] if it does not exist.
    fn transition(&self, job_id: &str, to_state: JobState) -> Result<JobRecord, StateStoreError>;

    /// Moves a non-terminal job to [`JobState::Canceled`]; a no-op if the
    /// job is already terminal.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::NotFound`] if the job does not exist.
    fn cancel(&self, job_id: &str) -> Result<JobRecord, StateStoreError>;

    /// Appends an event to a job's history, assigning the next `seq`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::NotFound`] if the job does not exist.
    fn append_event(&self, job_id: &str, event_type: &str, payload: serde_json::Value) -> Result<EventRecord, StateStoreError>;

    /// Returns events with `seq > since_seq`, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::NotFound`] if the job does not exist.
    fn events_since(&self, job_id: &str, since_seq: u64) -> Result<Vec<EventRecord>, StateStoreError>;

    /// Removes terminal jobs whose `updated_at` is older than `now - ttl_seconds`,
    /// along with their events and idempotency rows. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Backend`] if the removal cannot complete.
    fn gc(&self, ttl_seconds: u64) -> Result<u64, StateStoreError>;
}

/// Returns the current Unix epoch time in fractional seconds.
#[must_use]
pub fn now_epoch() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, JobRecord>,
    idempotency: HashMap<(String, String), (String, String)>,
}

/// In-process [`StateStore`], mirroring `RuntimeStateStore`: one mutex over
/// a job table and an idempotency ledger.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn submit(&self, job: JobRecord, client_id: &str) -> Result<(JobRecord, bool), StateStoreError> {
        let mut inner = self.inner.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let key = (client_id.to_string(), job.idempotency_key.clone());
        if let Some((prior_hash, job_id)) = inner.idempotency.get(&key).cloned() {
            if prior_hash != job.request_hash {
                return Err(StateStoreError::IdempotencyKeyReused);
            }
            let stored = inner.jobs.get(&job_id).cloned().ok_or_else(|| StateStoreError::NotFound(job_id.clone()))?;
            return Ok((stored, true));
        }
        inner.idempotency.insert(key, (job.request_hash.clone(), job.job_id.clone()));
        inner.jobs.insert(job.job_id.clone(), job.clone());
        Ok((job, false))
    }

    fn get(&self, job_id: &str) -> Result<JobRecord, StateStoreError> {
        let inner = self.inner.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        inner.jobs.get(job_id).cloned().ok_or_else(|| StateStoreError::NotFound(job_id.to_string()))
    }

    fn transition(&self, job_id: &str, to_state: JobState) -> Result<JobRecord, StateStoreError> {
        let mut inner = self.inner.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let job = inner.jobs.get_mut(job_id).ok_or_else(|| StateStoreError::NotFound(job_id.to_string()))?;
        if job.state.is_terminal() {
            return Err(StateStoreError::TerminalTransition(job.state, to_state));
        }
        job.state = to_state;
        job.updated_at_epoch = now_epoch();
        Ok(job.clone())
    }

    fn cancel(&self, job_id: &str) -> Result<JobRecord, StateStoreError> {
        let mut inner = self.inner.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let job = inner.jobs.get_mut(job_id).ok_or_else(|| StateStoreError::NotFound(job_id.to_string()))?;
        if !job.state.is_terminal() {
            job.state = JobState::Canceled;
            job.updated_at_epoch = now_epoch();
        }
        Ok(job.clone())
    }

    fn append_event(&self, job_id: &str, event_type: &str, payload: serde_json::Value) -> Result<EventRecord, StateStoreError> {
        let mut inner = self.inner.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let job = inner.jobs.get_mut(job_id).ok_or_else(|| StateStoreError::NotFound(job_id.to_string()))?;
        let seq = job.events.len() as u64 + 1;
        let event = EventRecord {
            seq,
            event_type: event_type.to_string(),
            payload,
            ts_epoch: now_epoch(),
        };
        job.events.push(event.clone());
        job.updated_at_epoch = event.ts_epoch;
        Ok(event)
    }

    fn events_since(&self, job_id: &str, since_seq: u64) -> Result<Vec<EventRecord>, StateStoreError> {
        let inner = self.inner.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let job = inner.jobs.get(job_id).ok_or_else(|| StateStoreError::NotFound(job_id.to_string()))?;
        Ok(job.events.iter().filter(|event| event.seq > since_seq).cloned().collect())
    }

    fn gc(&self, ttl_seconds: u64) -> Result<u64, StateStoreError> {
        let mut inner = self.inner.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let cutoff = now_epoch() - ttl_seconds as f64;
        let expired: Vec<String> = inner
            .jobs
            .values()
            .filter(|job| job.state.is_terminal() && job.updated_at_epoch < cutoff)
            .map(|job| job.job_id.clone())
            .collect();
        for job_id in &expired {
            inner.jobs.remove(job_id);
        }
        inner.idempotency.retain(|_, (_, job_id)| !expired.contains(job_id));
        Ok(expired.len() as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;

    fn job(job_id: &str, idempotency_key: &str, request_hash: &str) -> JobRecord {
        JobRecord {
            job_id: job_id.to_string(),
            run_id: format!("run-{job_id}"),
            state: JobState::Queued,
            skill_id: "job.noop".to_string(),
            profile: "default".to_string(),
            idempotency_key: idempotency_key.to_string(),
            request_hash: request_hash.to_string(),
            artifacts: Vec::new(),
            events: Vec::new(),
            updated_at_epoch: now_epoch(),
        }
    }

    #[test]
    fn submitting_the_same_idempotency_key_replays_the_stored_job() {
        let store = InMemoryStateStore::new();
        let (first, replay) = store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
        assert!(!replay);
        let (second, replay) = store.submit(job("job-2", "key-a", "hash-a"), "client").unwrap();
        assert!(replay);
        assert_eq!(second.job_id, first.job_id);
    }

    #[test]
    fn reusing_an_idempotency_key_with_a_different_hash_fails() {
        let store = InMemoryStateStore::new();
        store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
        let result = store.submit(job("job-2", "key-a", "hash-b"), "client");
        assert!(matches!(result, Err(StateStoreError::IdempotencyKeyReused)));
    }

    #[test]
    fn a_terminal_job_rejects_further_transitions() {
        let store = InMemoryStateStore::new();
        store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
        store.transition("job-1", JobState::Succeeded).unwrap();
        let result = store.transition("job-1", JobState::Running);
        assert!(matches!(result, Err(StateStoreError::TerminalTransition(JobState::Succeeded, JobState::Running))));
    }

    #[test]
    fn canceling_a_terminal_job_is_a_no_op() {
        let store = InMemoryStateStore::new();
        store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
        store.transition("job-1", JobState::Failed).unwrap();
        let job = store.cancel("job-1").unwrap();
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn events_since_returns_only_newer_events() {
        let store = InMemoryStateStore::new();
        store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
        store.append_event("job-1", "log", serde_json::json!({"line": "one"})).unwrap();
        store.append_event("job-1", "log", serde_json::json!({"line": "two"})).unwrap();
        let events = store.events_since("job-1", 1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 2);
    }

    #[test]
    fn gc_removes_only_terminal_and_expired_jobs() {
        let store = InMemoryStateStore::new();
        store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
        store.transition("job-1", JobState::Succeeded).unwrap();
        store.submit(job("job-2", "key-b", "hash-b"), "client").unwrap();
        let removed = store.gc(0).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("job-1").is_err());
        assert!(store.get("job-2").is_ok());
    }
}
