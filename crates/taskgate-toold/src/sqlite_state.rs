// taskgate-toold/src/sqlite_state.rs
// ============================================================================
// Module: SQLite Job State Store
// Description: Durable StateStore backed by SQLite, for job/event history
// that must survive a daemon restart.
// Purpose: Give long-running tool executions a crash-safe ledger.
// Dependencies: rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Schema mirrors [`crate::state::InMemoryStateStore`]'s shape: a `jobs`
//! table holding the latest state per job, an `events` table of append-only
//! rows keyed by `(job_id, seq)`, and an `idempotency` table keyed by
//! `(client_id, idempotency_key)`. Every mutation runs inside one
//! transaction over a single mutex-guarded connection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;

use crate::state::EventRecord;
use crate::state::JobRecord;
use crate::state::JobState;
use crate::state::StateStore;
use crate::state::StateStoreError;
use crate::state::now_epoch;

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Configuration for the `SQLite`-backed job state store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStateConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// `SQLite`-backed [`StateStore`].
pub struct SqliteStateStore {
    connection: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Opens (creating if absent) a durable job state store.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Backend`] when the database cannot be
    /// opened or its schema initialized.
    pub fn new(config: SqliteStateConfig) -> Result<Self, StateStoreError> {
        ensure_parent_dir(&config.path)?;
        let connection = open_connection(&config)?;
        initialize_schema(&connection)?;
        Ok(Self { connection: Mutex::new(connection) })
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), StateStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| StateStoreError::Backend(err.to_string()))
}

fn open_connection(config: &SqliteStateConfig) -> Result<Connection, StateStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| StateStoreError::Backend(err.to_string()))?;
    connection
        .execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        .map_err(|err| StateStoreError::Backend(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| StateStoreError::Backend(err.to_string()))?;
    Ok(connection)
}

fn initialize_schema(connection: &Connection) -> Result<(), StateStoreError> {
    connection
        .execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);
             INSERT INTO store_meta (version)
                SELECT {SCHEMA_VERSION} WHERE NOT EXISTS (SELECT 1 FROM store_meta);
             CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                state TEXT NOT NULL,
                skill_id TEXT NOT NULL,
                profile TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                artifacts_json TEXT NOT NULL,
                updated_at_epoch REAL NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_jobs_state_updated
                ON jobs (state, updated_at_epoch);
             CREATE TABLE IF NOT EXISTS events (
                job_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                ts_epoch REAL NOT NULL,
                PRIMARY KEY (job_id, seq),
                FOREIGN KEY (job_id) REFERENCES jobs(job_id) ON DELETE CASCADE
             );
             CREATE TABLE IF NOT EXISTS idempotency (
                client_id TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                job_id TEXT NOT NULL,
                PRIMARY KEY (client_id, idempotency_key)
             );"
        ))
        .map_err(|err| StateStoreError::Backend(err.to_string()))
}

fn job_state_label(state: JobState) -> &'static str {
    match state {
        JobState::Queued => "queued",
        JobState::Running => "running",
        JobState::Succeeded => "succeeded",
        JobState::Failed => "failed",
        JobState::Canceled => "canceled",
    }
}

fn parse_job_state(label: &str) -> Result<JobState, StateStoreError> {
    match label {
        "queued" => Ok(JobState::Queued),
        "running" => Ok(JobState::Running),
        "succeeded" => Ok(JobState::Succeeded),
        "failed" => Ok(JobState::Failed),
        "canceled" => Ok(JobState::Canceled),
        other => Err(StateStoreError::Backend(format!("unknown job state: {other}"))),
    }
}

fn load_job(tx: &rusqlite::Transaction<'_>, job_id: &str) -> Result<JobRecord, StateStoreError> {
    let row = tx
        .query_row(
            "SELECT run_id, state, skill_id, profile, idempotency_key, request_hash, \
             artifacts_json, updated_at_epoch FROM jobs WHERE job_id = ?1",
            params![job_id],
            |row| {
                let run_id: String = row.get(0)?;
                let state: String = row.get(1)?;
                let skill_id: String = row.get(2)?;
                let profile: String = row.get(3)?;
                let idempotency_key: String = row.get(4)?;
                let request_hash: String = row.get(5)?;
                let artifacts_json: String = row.get(6)?;
                let updated_at_epoch: f64 = row.get(7)?;
                Ok((run_id, state, skill_id, profile, idempotency_key, request_hash, artifacts_json, updated_at_epoch))
            },
        )
        .optional()
        .map_err(|err| StateStoreError::Backend(err.to_string()))?;
    let Some((run_id, state, skill_id, profile, idempotency_key, request_hash, artifacts_json, updated_at_epoch)) = row
    else {
        return Err(StateStoreError::NotFound(job_id.to_string()));
    };
    let mut stmt = tx
        .prepare("SELECT seq, event_type, payload_json, ts_epoch FROM events WHERE job_id = ?1 ORDER BY seq")
        .map_err(|err| StateStoreError::Backend(err.to_string()))?;
    let events = stmt
        .query_map(params![job_id], |row| {
            let seq: i64 = row.get(0)?;
            let event_type: String = row.get(1)?;
            let payload_json: String = row.get(2)?;
            let ts_epoch: f64 = row.get(3)?;
            Ok((seq, event_type, payload_json, ts_epoch))
        })
        .map_err(|err| StateStoreError::Backend(err.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| StateStoreError::Backend(err.to_string()))?
        .into_iter()
        .map(|(seq, event_type, payload_json, ts_epoch)| {
            let payload = serde_json::from_str(&payload_json)
                .map_err(|err| StateStoreError::Backend(err.to_string()))?;
            Ok(EventRecord { seq: seq as u64, event_type, payload, ts_epoch })
        })
        .collect::<Result<Vec<_>, StateStoreError>>()?;
    let artifacts = serde_json::from_str(&artifacts_json).map_err(|err| StateStoreError::Backend(err.to_string()))?;
    Ok(JobRecord {
        job_id: job_id.to_string(),
        run_id,
        state: parse_job_state(&state)?,
        skill_id,
        profile,
        idempotency_key,
        request_hash,
        artifacts,
        events,
        updated_at_epoch,
    })
}

impl StateStore for SqliteStateStore {
    fn submit(&self, job: JobRecord, client_id: &str) -> Result<(JobRecord, bool), StateStoreError> {
        let mut guard = self.connection.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let tx = guard.transaction().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT request_hash, job_id FROM idempotency WHERE client_id = ?1 AND idempotency_key = ?2",
                params![client_id, job.idempotency_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        if let Some((prior_hash, job_id)) = existing {
            if prior_hash != job.request_hash {
                return Err(StateStoreError::IdempotencyKeyReused);
            }
            let stored = load_job(&tx, &job_id)?;
            tx.commit().map_err(|err| StateStoreError::Backend(err.to_string()))?;
            return Ok((stored, true));
        }
        let artifacts_json =
            serde_json::to_string(&job.artifacts).map_err(|err| StateStoreError::Backend(err.to_string()))?;
        tx.execute(
            "INSERT INTO jobs (job_id, run_id, state, skill_id, profile, idempotency_key, \
             request_hash, artifacts_json, updated_at_epoch) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.job_id,
                job.run_id,
                job_state_label(job.state),
                job.skill_id,
                job.profile,
                job.idempotency_key,
                job.request_hash,
                artifacts_json,
                job.updated_at_epoch
            ],
        )
        .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        tx.execute(
            "INSERT INTO idempotency (client_id, idempotency_key, request_hash, job_id) VALUES (?1, ?2, ?3, ?4)",
            params![client_id, job.idempotency_key, job.request_hash, job.job_id],
        )
        .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        tx.commit().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        Ok((job, false))
    }

    fn get(&self, job_id: &str) -> Result<JobRecord, StateStoreError> {
        let mut guard = self.connection.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let tx = guard.transaction().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let job = load_job(&tx, job_id)?;
        tx.commit().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        Ok(job)
    }

    fn transition(&self, job_id: &str, to_state: JobState) -> Result<JobRecord, StateStoreError> {
        let mut guard = self.connection.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let tx = guard.transaction().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let job = load_job(&tx, job_id)?;
        if job.state.is_terminal() {
            return Err(StateStoreError::TerminalTransition(job.state, to_state));
        }
        let updated_at = now_epoch();
        tx.execute(
            "UPDATE jobs SET state = ?1, updated_at_epoch = ?2 WHERE job_id = ?3",
            params![job_state_label(to_state), updated_at, job_id],
        )
        .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let job = load_job(&tx, job_id)?;
        tx.commit().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        Ok(job)
    }

    fn cancel(&self, job_id: &str) -> Result<JobRecord, StateStoreError> {
        let mut guard = self.connection.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let tx = guard.transaction().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let job = load_job(&tx, job_id)?;
        if !job.state.is_terminal() {
            let updated_at = now_epoch();
            tx.execute(
                "UPDATE jobs SET state = ?1, updated_at_epoch = ?2 WHERE job_id = ?3",
                params![job_state_label(JobState::Canceled), updated_at, job_id],
            )
            .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        }
        let job = load_job(&tx, job_id)?;
        tx.commit().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        Ok(job)
    }

    fn append_event(&self, job_id: &str, event_type: &str, payload: serde_json::Value) -> Result<EventRecord, StateStoreError> {
        let mut guard = self.connection.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let tx = guard.transaction().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let exists: Option<i64> =
            tx.query_row("SELECT 1 FROM jobs WHERE job_id = ?1", params![job_id], |row| row.get(0))
                .optional()
                .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        if exists.is_none() {
            return Err(StateStoreError::NotFound(job_id.to_string()));
        }
        let next_seq: i64 = tx
            .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE job_id = ?1", params![job_id], |row| row.get(0))
            .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let ts_epoch = now_epoch();
        let payload_json = serde_json::to_string(&payload).map_err(|err| StateStoreError::Backend(err.to_string()))?;
        tx.execute(
            "INSERT INTO events (job_id, seq, event_type, payload_json, ts_epoch) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, next_seq, event_type, payload_json, ts_epoch],
        )
        .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        tx.execute("UPDATE jobs SET updated_at_epoch = ?1 WHERE job_id = ?2", params![ts_epoch, job_id])
            .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        tx.commit().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        Ok(EventRecord { seq: next_seq as u64, event_type: event_type.to_string(), payload, ts_epoch })
    }

    fn events_since(&self, job_id: &str, since_seq: u64) -> Result<Vec<EventRecord>, StateStoreError> {
        let mut guard = self.connection.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let tx = guard.transaction().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let exists: Option<i64> =
            tx.query_row("SELECT 1 FROM jobs WHERE job_id = ?1", params![job_id], |row| row.get(0))
                .optional()
                .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        if exists.is_none() {
            return Err(StateStoreError::NotFound(job_id.to_string()));
        }
        let since_seq = i64::try_from(since_seq).unwrap_or(i64::MAX);
        let mut stmt = tx
            .prepare("SELECT seq, event_type, payload_json, ts_epoch FROM events WHERE job_id = ?1 AND seq > ?2 ORDER BY seq")
            .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let events = stmt
            .query_map(params![job_id, since_seq], |row| {
                let seq: i64 = row.get(0)?;
                let event_type: String = row.get(1)?;
                let payload_json: String = row.get(2)?;
                let ts_epoch: f64 = row.get(3)?;
                Ok((seq, event_type, payload_json, ts_epoch))
            })
            .map_err(|err| StateStoreError::Backend(err.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StateStoreError::Backend(err.to_string()))?
            .into_iter()
            .map(|(seq, event_type, payload_json, ts_epoch)| {
                let payload = serde_json::from_str(&payload_json).map_err(|err| StateStoreError::Backend(err.to_string()))?;
                Ok(EventRecord { seq: seq as u64, event_type, payload, ts_epoch })
            })
            .collect::<Result<Vec<_>, StateStoreError>>()?;
        tx.commit().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        Ok(events)
    }

    fn gc(&self, ttl_seconds: u64) -> Result<u64, StateStoreError> {
        let mut guard = self.connection.lock().map_err(|_| StateStoreError::LockPoisoned)?;
        let tx = guard.transaction().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        let cutoff = now_epoch() - ttl_seconds as f64;
        let expired: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT job_id FROM jobs WHERE state IN ('succeeded', 'failed', 'canceled') \
                     AND updated_at_epoch < ?1",
                )
                .map_err(|err| StateStoreError::Backend(err.to_string()))?;
            stmt.query_map(params![cutoff], |row| row.get(0))
                .map_err(|err| StateStoreError::Backend(err.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| StateStoreError::Backend(err.to_string()))?
        };
        for job_id in &expired {
            tx.execute("DELETE FROM events WHERE job_id = ?1", params![job_id])
                .map_err(|err| StateStoreError::Backend(err.to_string()))?;
            tx.execute("DELETE FROM idempotency WHERE job_id = ?1", params![job_id])
                .map_err(|err| StateStoreError::Backend(err.to_string()))?;
            tx.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])
                .map_err(|err| StateStoreError::Backend(err.to_string()))?;
        }
        tx.commit().map_err(|err| StateStoreError::Backend(err.to_string()))?;
        Ok(expired.len() as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;

    fn store() -> (SqliteStateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toold.sqlite3");
        let store = SqliteStateStore::new(SqliteStateConfig { path, busy_timeout_ms: 1_000 }).unwrap();
        (store, dir)
    }

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
    fn a_submitted_job_round_trips_through_sqlite() {
        let (store, _dir) = store();
        let (stored, replay) = store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
        assert!(!replay);
        let fetched = store.get(&stored.job_id).unwrap();
        assert_eq!(fetched.job_id, "job-1");
        assert_eq!(fetched.state, JobState::Queued);
    }

    #[test]
    fn replaying_the_same_idempotency_key_returns_the_stored_job() {
        let (store, _dir) = store();
        store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
        let (second, replay) = store.submit(job("job-2", "key-a", "hash-a"), "client").unwrap();
        assert!(replay);
        assert_eq!(second.job_id, "job-1");
    }

    #[test]
    fn events_persist_across_a_reopened_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toold.sqlite3");
        {
            let store = SqliteStateStore::new(SqliteStateConfig { path: path.clone(), busy_timeout_ms: 1_000 }).unwrap();
            store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
            store.append_event("job-1", "log", serde_json::json!({"line": "hi"})).unwrap();
        }
        let reopened = SqliteStateStore::new(SqliteStateConfig { path, busy_timeout_ms: 1_000 }).unwrap();
        let events = reopened.events_since("job-1", 0).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn gc_deletes_only_terminal_jobs_past_the_ttl() {
        let (store, _dir) = store();
        store.submit(job("job-1", "key-a", "hash-a"), "client").unwrap();
        store.transition("job-1", JobState::Succeeded).unwrap();
        let removed = store.gc(0).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("job-1").is_err());
    }
}
