// taskgate-memory/src/binder.rs
// ============================================================================
// Module: Deterministic Binder
// Description: Derives stable, idempotent binder rows from task fact rows.
// Purpose: Turn a pile of per-run task results into a small set of
// reusable, fingerprinted "this failure/validation has been seen before"
// artifacts that downstream planning can query.
// Dependencies: taskgate-core (hashing), crate::store
// ============================================================================

//! ## Overview
//! [`derive_rows_from_task_rows`] folds every eligible [`crate::store::TaskFact`]
//! into one [`BinderRow`]. Eligibility depends on [`BinderMode`]: `Lenient`
//! takes every row; `Strict` and `Hybrid` only take rows carrying an
//! explicit failure or policy-denial signal. Binder version `"v1"` is baked
//! into both of a row's derived keys, so a future format change naturally
//! produces disjoint keys rather than colliding with old rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use taskgate_core::hash_canonical_json;
use taskgate_core::hash_joined_parts;

use crate::store::TaskFact;

/// Binder schema version baked into every derived key.
pub const BINDER_VERSION: &str = "v1";

/// Controls which task fact rows [`derive_rows_from_task_rows`] considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderMode {
    /// Only rows with an explicit failure or policy reason code, or a
    /// `FAIL` status.
    Strict,
    /// Same eligibility as [`BinderMode::Strict`]; kept distinct so a wider
    /// hybrid-matching strategy can be layered in later without touching
    /// callers that already distinguish the two.
    Hybrid,
    /// Every row is eligible, regardless of status or reason codes.
    Lenient,
}

impl BinderMode {
    /// Parses a mode from its CLI spelling (`"strict"`, `"hybrid"`, `"lenient"`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "strict" => Some(Self::Strict),
            "hybrid" => Some(Self::Hybrid),
            "lenient" => Some(Self::Lenient),
            _ => None,
        }
    }
}

/// One derived binder artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct BinderRow {
    /// Idempotent upsert key identifying this artifact across runs.
    pub derived_upsert_key: String,
    /// Per-occurrence idempotency key (differs per `(run_id, task_id)`
    /// even when two occurrences derive the same [`Self::derived_upsert_key`]).
    pub idempotency_key: String,
    /// The run this occurrence was observed in.
    pub run_id: String,
    /// The task this occurrence was observed in.
    pub task_id: String,
    /// Grouping key; currently always equal to `task_id`.
    pub group_id: String,
    /// Artifact scope, currently always `"task"`.
    pub scope: String,
    /// Kind of thing this artifact targets, currently always `"task"`.
    pub target_kind: String,
    /// Identifier of the targeted thing, currently always `task_id`.
    pub target_id: String,
    /// `"fix"` for a failed task, `"validate"` otherwise.
    pub action_kind: String,
    /// Failure reason code carried through from the task fact row.
    pub failure_reason_code: String,
    /// Policy reason code carried through from the task fact row.
    pub policy_reason_code: String,
    /// Digest over the fields that make two occurrences "the same shape".
    pub fingerprint_hash: String,
    /// Binder format version, always [`BINDER_VERSION`].
    pub binder_version: String,
    /// Number of occurrences supporting this artifact; always `1` for a
    /// freshly derived row, left for a future merge pass to accumulate.
    pub support_count: i64,
    /// Number of occurrences contradicting this artifact; always `0` for a
    /// freshly derived row.
    pub contradiction_count: i64,
    /// Timestamp of the task fact row this occurrence was derived from.
    pub last_seen_ts: String,
}

#[derive(Serialize)]
struct FingerprintPayload<'a> {
    status: &'a str,
    failure_reason_code: &'a str,
    policy_reason_code: &'a str,
    attempts: i64,
    duration_ms: i64,
    worker_model: &'a str,
}

fn eligible(mode: BinderMode, status: &str, failure_reason_code: &str, policy_reason_code: &str) -> bool {
    match mode {
        BinderMode::Lenient => true,
        BinderMode::Strict | BinderMode::Hybrid => {
            status == "FAIL" || !failure_reason_code.is_empty() || !policy_reason_code.is_empty()
        }
    }
}

/// Derives one [`BinderRow`] per eligible row in `task_rows`, in the order
/// given (callers should pass [`crate::store::FactStore::all_task_facts`]'s
/// output, already ordered `updated_ts DESC, run_id ASC, task_id ASC`).
#[must_use]
pub fn derive_rows_from_task_rows(task_rows: &[TaskFact], mode: BinderMode) -> Vec<BinderRow> {
    task_rows
        .iter()
        .filter(|row| eligible(mode, &row.status, &row.failure_reason_code, &row.policy_reason_code))
        .map(|row| {
            let group_id = row.task_id.clone();
            let scope = "task".to_string();
            let target_kind = "task".to_string();
            let target_id = row.task_id.clone();
            let action_kind = if row.status == "FAIL" { "fix" } else { "validate" }.to_string();
            let fingerprint_hash = hash_canonical_json(&FingerprintPayload {
                status: &row.status,
                failure_reason_code: &row.failure_reason_code,
                policy_reason_code: &row.policy_reason_code,
                attempts: row.attempts,
                duration_ms: row.duration_ms,
                worker_model: &row.worker_model,
            })
            .unwrap_or_default();
            let idempotency_key = hash_joined_parts(&[&row.run_id, &row.task_id, &group_id, BINDER_VERSION]);
            let derived_upsert_key = hash_joined_parts(&[
                &scope,
                &target_kind,
                &target_id,
                &action_kind,
                &row.failure_reason_code,
                &fingerprint_hash,
                BINDER_VERSION,
            ]);
            BinderRow {
                derived_upsert_key,
                idempotency_key,
                run_id: row.run_id.clone(),
                task_id: row.task_id.clone(),
                group_id,
                scope,
                target_kind,
                target_id,
                action_kind,
                failure_reason_code: row.failure_reason_code.clone(),
                policy_reason_code: row.policy_reason_code.clone(),
                fingerprint_hash,
                binder_version: BINDER_VERSION.to_string(),
                support_count: 1,
                contradiction_count: 0,
                last_seen_ts: row.updated_ts.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;

    fn task_fact(task_id: &str, status: &str, failure_reason_code: &str) -> TaskFact {
        TaskFact {
            run_id: "run-1".to_string(),
            task_id: task_id.to_string(),
            status: status.to_string(),
            failure_reason_code: failure_reason_code.to_string(),
            policy_reason_code: String::new(),
            attempts: 2,
            duration_ms: 500,
            worker_model: "worker-a".to_string(),
            evidence_bundle_path: String::new(),
            updated_ts: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn strict_mode_keeps_only_failures_with_a_reason_code() {
        let rows = vec![task_fact("task-a", "FAIL", "E_VERIFY_FAILED"), task_fact("task-b", "PASS", "")];
        let derived = derive_rows_from_task_rows(&rows, BinderMode::Strict);
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0].task_id, "task-a");
        assert_eq!(derived[0].action_kind, "fix");
    }

    #[test]
    fn lenient_mode_keeps_every_row() {
        let rows = vec![task_fact("task-a", "FAIL", "E_VERIFY_FAILED"), task_fact("task-b", "PASS", "")];
        let derived = derive_rows_from_task_rows(&rows, BinderMode::Lenient);
        assert_eq!(derived.len(), 2);
        assert_eq!(derived[1].action_kind, "validate");
    }

    #[test]
    fn identical_shaped_failures_in_different_runs_share_a_derived_upsert_key() {
        let mut first = task_fact("task-a", "FAIL", "E_VERIFY_FAILED");
        let mut second = task_fact("task-a", "FAIL", "E_VERIFY_FAILED");
        second.run_id = "run-2".to_string();
        let derived = derive_rows_from_task_rows(&[first.clone(), second.clone()], BinderMode::Strict);
        assert_eq!(derived[0].derived_upsert_key, derived[1].derived_upsert_key);
        assert_ne!(derived[0].idempotency_key, derived[1].idempotency_key);
        first.attempts = 9;
        let distinct = derive_rows_from_task_rows(&[first, second], BinderMode::Strict);
        assert_ne!(distinct[0].derived_upsert_key, distinct[1].derived_upsert_key);
    }
}
