// taskgate-memory/src/store.rs
// ============================================================================
// Module: Fact Store
// Description: SQLite-backed query-friendly fact tables the materializer
// folds runs into and the binder derives rows from.
// Purpose: Give operators and agents a single place to query run, task,
// event, and binder history without re-reading run directories by hand.
// Dependencies: rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Four tables: `run_fact` keyed by `run_id`, `task_fact` keyed by
//! `(run_id, task_id)`, `event_fact` keyed by `(run_id, event_id)`, and
//! `binder_fact` keyed by `derived_upsert_key`. Every write is
//! `INSERT OR REPLACE`, so folding the same run twice is a no-op beyond
//! updating `last_seen_ts`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::params;

use crate::binder::BinderRow;

/// Errors raised operating the fact store.
#[derive(Debug, thiserror::Error)]
pub enum FactStoreError {
    /// The database could not be opened, or a statement failed.
    #[error("fact store backend error: {0}")]
    Backend(String),
    /// The store's internal mutex was poisoned by a prior panic.
    #[error("fact store lock poisoned")]
    LockPoisoned,
}

/// One materialized run, mirroring a run's `run_fact` row.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFact {
    /// Run identifier.
    pub run_id: String,
    /// Base ref the run's work queue was planned against.
    pub base_ref: String,
    /// The run's gate status string.
    pub gate_status: String,
    /// The run's substrate status string.
    pub substrate_status: String,
    /// The run's promotion decision string.
    pub promotion_decision: String,
    /// Risk score carried from the gate decision.
    pub risk_score: i64,
    /// Confidence carried from the gate decision.
    pub confidence: f64,
    /// Repository commit sha the run executed against, when known.
    pub repo_commit_sha: String,
    /// Path to the run's `summary.json`.
    pub summary_path: String,
    /// Path to the run's `state.space.json`.
    pub state_space_path: String,
}

/// One materialized task result, mirroring a `task_fact` row.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFact {
    /// Owning run identifier.
    pub run_id: String,
    /// Task identifier within the run.
    pub task_id: String,
    /// Final task status (`"PASS"` or `"FAIL"`).
    pub status: String,
    /// Reason code explaining a failure, when applicable.
    pub failure_reason_code: String,
    /// Reason code attributed to a policy/gate denial, when applicable.
    pub policy_reason_code: String,
    /// Total attempts made.
    pub attempts: i64,
    /// Duration of the final attempt, in milliseconds.
    pub duration_ms: i64,
    /// Worker model that produced the result.
    pub worker_model: String,
    /// Path to the task's evidence bundle, when one was persisted.
    pub evidence_bundle_path: String,
    /// ISO-8601 timestamp the row was last updated.
    pub updated_ts: String,
}

/// One materialized bus event, mirroring an `event_fact` row.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFact {
    /// Owning run identifier.
    pub run_id: String,
    /// Globally unique event identifier.
    pub event_id: String,
    /// Topic the event was published on.
    pub topic: String,
    /// Process-monotonic sequence number at publish time.
    pub sequence: i64,
    /// UTC ISO-8601 timestamp.
    pub ts: String,
    /// Event payload, serialized as compact JSON text.
    pub payload_json: String,
}

/// `SQLite`-backed fact store.
pub struct FactStore {
    connection: Mutex<Connection>,
}

impl FactStore {
    /// Opens (creating if absent) a fact store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FactStoreError::Backend`] if the database cannot be opened
    /// or its schema initialized.
    pub fn open(path: &Path) -> Result<Self, FactStoreError> {
        ensure_parent_dir(path)?;
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection =
            Connection::open_with_flags(path, flags).map_err(|err| FactStoreError::Backend(err.to_string()))?;
        connection
            .execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .map_err(|err| FactStoreError::Backend(err.to_string()))?;
        initialize_schema(&connection)?;
        Ok(Self { connection: Mutex::new(connection) })
    }

    /// Idempotently upserts a run fact row.
    ///
    /// # Errors
    ///
    /// Returns [`FactStoreError`] if the write fails.
    pub fn upsert_run_fact(&self, fact: &RunFact) -> Result<(), FactStoreError> {
        let guard = self.connection.lock().map_err(|_| FactStoreError::LockPoisoned)?;
        guard
            .execute(
                "INSERT INTO run_fact (
                    run_id, first_seen_ts, last_seen_ts, base_ref, gate_status, substrate_status,
                    promotion_decision, risk_score, confidence, repo_commit_sha, summary_path, state_space_path
                 ) VALUES (?1, COALESCE((SELECT first_seen_ts FROM run_fact WHERE run_id = ?1), datetime('now')),
                    datetime('now'), ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(run_id) DO UPDATE SET
                    last_seen_ts = excluded.last_seen_ts,
                    base_ref = excluded.base_ref,
                    gate_status = excluded.gate_status,
                    substrate_status = excluded.substrate_status,
                    promotion_decision = excluded.promotion_decision,
                    risk_score = excluded.risk_score,
                    confidence = excluded.confidence,
                    repo_commit_sha = excluded.repo_commit_sha,
                    summary_path = excluded.summary_path,
                    state_space_path = excluded.state_space_path",
                params![
                    fact.run_id,
                    fact.base_ref,
                    fact.gate_status,
                    fact.substrate_status,
                    fact.promotion_decision,
                    fact.risk_score,
                    fact.confidence,
                    fact.repo_commit_sha,
                    fact.summary_path,
                    fact.state_space_path,
                ],
            )
            .map_err(|err| FactStoreError::Backend(err.to_string()))?;
        Ok(())
    }

    /// Idempotently upserts a task fact row.
    ///
    /// # Errors
    ///
    /// Returns [`FactStoreError`] if the write fails.
    pub fn upsert_task_fact(&self, fact: &TaskFact) -> Result<(), FactStoreError> {
        let guard = self.connection.lock().map_err(|_| FactStoreError::LockPoisoned)?;
        guard
            .execute(
                "INSERT OR REPLACE INTO task_fact (
                    run_id, task_id, status, failure_reason_code, policy_reason_code,
                    attempts, duration_ms, worker_model, evidence_bundle_path, updated_ts
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    fact.run_id,
                    fact.task_id,
                    fact.status,
                    fact.failure_reason_code,
                    fact.policy_reason_code,
                    fact.attempts,
                    fact.duration_ms,
                    fact.worker_model,
                    fact.evidence_bundle_path,
                    fact.updated_ts,
                ],
            )
            .map_err(|err| FactStoreError::Backend(err.to_string()))?;
        Ok(())
    }

    /// Idempotently upserts an event fact row.
    ///
    /// # Errors
    ///
    /// Returns [`FactStoreError`] if the write fails.
    pub fn upsert_event_fact(&self, fact: &EventFact) -> Result<(), FactStoreError> {
        let guard = self.connection.lock().map_err(|_| FactStoreError::LockPoisoned)?;
        guard
            .execute(
                "INSERT OR REPLACE INTO event_fact (
                    run_id, event_id, topic, sequence, ts, payload_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![fact.run_id, fact.event_id, fact.topic, fact.sequence, fact.ts, fact.payload_json],
            )
            .map_err(|err| FactStoreError::Backend(err.to_string()))?;
        Ok(())
    }

    /// Idempotently upserts a binder fact row.
    ///
    /// # Errors
    ///
    /// Returns [`FactStoreError`] if the write fails.
    pub fn upsert_binder_fact(&self, row: &BinderRow) -> Result<(), FactStoreError> {
        let guard = self.connection.lock().map_err(|_| FactStoreError::LockPoisoned)?;
        guard
            .execute(
                "INSERT OR REPLACE INTO binder_fact (
                    derived_upsert_key, idempotency_key, run_id, task_id, group_id,
                    scope, target_kind, target_id, action_kind, failure_reason_code,
                    policy_reason_code, fingerprint_hash, binder_version,
                    support_count, contradiction_count, last_seen_ts
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    row.derived_upsert_key,
                    row.idempotency_key,
                    row.run_id,
                    row.task_id,
                    row.group_id,
                    row.scope,
                    row.target_kind,
                    row.target_id,
                    row.action_kind,
                    row.failure_reason_code,
                    row.policy_reason_code,
                    row.fingerprint_hash,
                    row.binder_version,
                    row.support_count,
                    row.contradiction_count,
                    row.last_seen_ts,
                ],
            )
            .map_err(|err| FactStoreError::Backend(err.to_string()))?;
        Ok(())
    }

    /// Returns every task fact row, ordered `updated_ts DESC, run_id ASC,
    /// task_id ASC` — the order [`crate::binder::derive_rows_from_task_rows`]
    /// expects so ties resolve deterministically.
    ///
    /// # Errors
    ///
    /// Returns [`FactStoreError`] if the query fails.
    pub fn all_task_facts(&self) -> Result<Vec<TaskFact>, FactStoreError> {
        let guard = self.connection.lock().map_err(|_| FactStoreError::LockPoisoned)?;
        let mut stmt = guard
            .prepare(
                "SELECT run_id, task_id, status, failure_reason_code, policy_reason_code,
                    attempts, duration_ms, worker_model, evidence_bundle_path, updated_ts
                 FROM task_fact
                 ORDER BY updated_ts DESC, run_id ASC, task_id ASC",
            )
            .map_err(|err| FactStoreError::Backend(err.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TaskFact {
                    run_id: row.get(0)?,
                    task_id: row.get(1)?,
                    status: row.get(2)?,
                    failure_reason_code: row.get(3)?,
                    policy_reason_code: row.get(4)?,
                    attempts: row.get(5)?,
                    duration_ms: row.get(6)?,
                    worker_model: row.get(7)?,
                    evidence_bundle_path: row.get(8)?,
                    updated_ts: row.get(9)?,
                })
            })
            .map_err(|err| FactStoreError::Backend(err.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| FactStoreError::Backend(err.to_string()))?;
        Ok(rows)
    }

    /// Returns the run fact row for `run_id`, when materialized.
    ///
    /// # Errors
    ///
    /// Returns [`FactStoreError`] if the query fails.
    pub fn get_run_fact(&self, run_id: &str) -> Result<Option<RunFact>, FactStoreError> {
        let guard = self.connection.lock().map_err(|_| FactStoreError::LockPoisoned)?;
        guard
            .query_row(
                "SELECT run_id, base_ref, gate_status, substrate_status, promotion_decision,
                    risk_score, confidence, repo_commit_sha, summary_path, state_space_path
                 FROM run_fact WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(RunFact {
                        run_id: row.get(0)?,
                        base_ref: row.get(1)?,
                        gate_status: row.get(2)?,
                        substrate_status: row.get(3)?,
                        promotion_decision: row.get(4)?,
                        risk_score: row.get(5)?,
                        confidence: row.get(6)?,
                        repo_commit_sha: row.get(7)?,
                        summary_path: row.get(8)?,
                        state_space_path: row.get(9)?,
                    })
                },
            )
            .map_or_else(
                |err| match err {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(FactStoreError::Backend(other.to_string())),
                },
                |fact| Ok(Some(fact)),
            )
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), FactStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| FactStoreError::Backend(err.to_string()))
}

fn initialize_schema(connection: &Connection) -> Result<(), FactStoreError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS run_fact (
                run_id TEXT PRIMARY KEY,
                first_seen_ts TEXT NOT NULL,
                last_seen_ts TEXT NOT NULL,
                base_ref TEXT NOT NULL,
                gate_status TEXT NOT NULL,
                substrate_status TEXT NOT NULL,
                promotion_decision TEXT NOT NULL,
                risk_score INTEGER NOT NULL,
                confidence REAL NOT NULL,
                repo_commit_sha TEXT NOT NULL,
                summary_path TEXT NOT NULL,
                state_space_path TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS task_fact (
                run_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL,
                failure_reason_code TEXT NOT NULL,
                policy_reason_code TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                worker_model TEXT NOT NULL,
                evidence_bundle_path TEXT NOT NULL,
                updated_ts TEXT NOT NULL,
                PRIMARY KEY (run_id, task_id)
             );
             CREATE TABLE IF NOT EXISTS event_fact (
                run_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                ts TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (run_id, event_id)
             );
             CREATE TABLE IF NOT EXISTS binder_fact (
                derived_upsert_key TEXT PRIMARY KEY,
                idempotency_key TEXT NOT NULL,
                run_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                target_kind TEXT NOT NULL,
                target_id TEXT NOT NULL,
                action_kind TEXT NOT NULL,
                failure_reason_code TEXT NOT NULL,
                policy_reason_code TEXT NOT NULL,
                fingerprint_hash TEXT NOT NULL,
                binder_version TEXT NOT NULL,
                support_count INTEGER NOT NULL,
                contradiction_count INTEGER NOT NULL,
                last_seen_ts TEXT NOT NULL
             );",
        )
        .map_err(|err| FactStoreError::Backend(err.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;

    fn store() -> (FactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FactStore::open(&dir.path().join("memory.sqlite3")).unwrap();
        (store, dir)
    }

    fn run_fact(run_id: &str) -> RunFact {
        RunFact {
            run_id: run_id.to_string(),
            base_ref: "main".to_string(),
            gate_status: "APPROVE".to_string(),
            substrate_status: "GREEN".to_string(),
            promotion_decision: "APPROVE".to_string(),
            risk_score: 2,
            confidence: 0.9,
            repo_commit_sha: "deadbeef".to_string(),
            summary_path: format!("runs/{run_id}/summary.json"),
            state_space_path: format!("runs/{run_id}/state.space.json"),
        }
    }

    #[test]
    fn upserting_a_run_fact_twice_preserves_first_seen_and_updates_the_rest() {
        let (store, _dir) = store();
        store.upsert_run_fact(&run_fact("run-1")).unwrap();
        let mut second = run_fact("run-1");
        second.gate_status = "REJECT".to_string();
        store.upsert_run_fact(&second).unwrap();
        let fetched = store.get_run_fact("run-1").unwrap().unwrap();
        assert_eq!(fetched.gate_status, "REJECT");
    }

    #[test]
    fn task_facts_are_ordered_by_updated_ts_then_run_then_task() {
        let (store, _dir) = store();
        let base = TaskFact {
            run_id: "run-1".to_string(),
            task_id: "task-a".to_string(),
            status: "PASS".to_string(),
            failure_reason_code: String::new(),
            policy_reason_code: String::new(),
            attempts: 1,
            duration_ms: 10,
            worker_model: "worker-a".to_string(),
            evidence_bundle_path: String::new(),
            updated_ts: "2026-01-01T00:00:00Z".to_string(),
        };
        let mut later = base.clone();
        later.task_id = "task-b".to_string();
        later.updated_ts = "2026-01-02T00:00:00Z".to_string();
        store.upsert_task_fact(&base).unwrap();
        store.upsert_task_fact(&later).unwrap();
        let rows = store.all_task_facts().unwrap();
        assert_eq!(rows[0].task_id, "task-b");
        assert_eq!(rows[1].task_id, "task-a");
    }

    #[test]
    fn a_missing_run_fact_returns_none() {
        let (store, _dir) = store();
        assert!(store.get_run_fact("missing").unwrap().is_none());
    }
}
