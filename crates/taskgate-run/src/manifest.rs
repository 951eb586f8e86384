// taskgate-run/src/manifest.rs
// ============================================================================
// Module: Taskgate Run Manifest
// Description: Deterministic record of the inputs, environment, and
// artifacts of one pipeline run.
// Purpose: Let a run be reproduced or audited without re-reading every
// artifact file by hand.
// Dependencies: taskgate-core
// ============================================================================

//! ## Overview
//! Mirrors the shape of a Decision Gate runpack manifest (hashed inputs,
//! an artifact index, integrity metadata) but carries a run's command list
//! and budgets rather than a scenario spec's disclosure artifacts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use taskgate_core::Budgets;
use taskgate_core::PreContract;
use taskgate_core::ReasonCodeCatalog;
use taskgate_core::WorkQueue;
use taskgate_core::hash_canonical_json;
use taskgate_eventbus::clock::utc_now_iso;

/// Run manifest schema version.
pub const RUN_MANIFEST_VERSION: &str = "0.1.0";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Canonical-JSON sha256 digests of a run's structural inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputHashes {
    /// Digest of the pre-contract that started the run.
    pub pre_contract: String,
    /// Digest of the state-space template the writer folds into.
    pub state_space_template: String,
    /// Digest of the reason-code catalog the checker validated against.
    pub reason_codes: String,
    /// Digest of the planned work queue.
    pub work_queue: String,
}

/// Environment the run executed under, for reproducibility and audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFingerprint {
    /// Repository commit the run executed against, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_commit: Option<String>,
    /// Tool name to version string (this crate's own version, at minimum).
    pub tool_versions: BTreeMap<String, String>,
    /// Target platform triple.
    pub platform: String,
    /// Working directory the run executed from.
    pub cwd: String,
}

impl RuntimeFingerprint {
    /// Captures a fingerprint for the current process; `repo_commit` is
    /// left to the caller since discovering it needs shelling out to `git`,
    /// which a run may legitimately not want.
    #[must_use]
    pub fn capture(repo_commit: Option<String>) -> Self {
        let mut tool_versions = BTreeMap::new();
        tool_versions.insert("taskgate-run".to_string(), env!("CARGO_PKG_VERSION").to_string());
        Self {
            repo_commit,
            tool_versions,
            platform: std::env::consts::ARCH.to_string() + "-" + std::env::consts::OS,
            cwd: std::env::current_dir()
                .map(|path| path.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// The complete record of one pipeline run, written as `run.manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Run manifest schema version.
    pub manifest_version: String,
    /// The run's identifier.
    pub run_id: String,
    /// Millisecond-precision UTC timestamp the manifest was generated at.
    pub generated_at: String,
    /// Hashes of the run's structural inputs.
    pub input_hashes: InputHashes,
    /// Captured runtime environment.
    pub runtime_fingerprint: RuntimeFingerprint,
    /// Ordered list of pipeline commands this run executed.
    pub commands: Vec<String>,
    /// Resource budgets the run was planned under.
    pub budgets: Budgets,
    /// Paths to every artifact the run produced, keyed by a short label.
    pub artifact_paths: BTreeMap<String, String>,
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builds a [`RunManifest`] from a run's planned inputs and the artifact
/// paths its pipeline stages produced (`spec` §4.11).
#[must_use]
pub fn build_run_manifest(
    contract: &PreContract,
    work_queue: &WorkQueue,
    state_space_template: &serde_json::Value,
    catalog: &ReasonCodeCatalog,
    runtime_fingerprint: RuntimeFingerprint,
    commands: Vec<String>,
    artifact_paths: BTreeMap<String, String>,
) -> RunManifest {
    let input_hashes = InputHashes {
        pre_contract: hash_canonical_json(contract).unwrap_or_default(),
        state_space_template: hash_canonical_json(state_space_template).unwrap_or_default(),
        reason_codes: hash_canonical_json(catalog).unwrap_or_default(),
        work_queue: hash_canonical_json(work_queue).unwrap_or_default(),
    };
    RunManifest {
        manifest_version: RUN_MANIFEST_VERSION.to_string(),
        run_id: work_queue.run_id.to_string(),
        generated_at: utc_now_iso(),
        input_hashes,
        runtime_fingerprint,
        commands,
        budgets: contract.budgets.clone(),
        artifact_paths,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use std::collections::BTreeSet;

    use taskgate_core::PlanCard;
    use taskgate_core::PreContractActions;
    use taskgate_core::RunId;
    use taskgate_core::Task;
    use taskgate_core::TaskId;
    use taskgate_core::TaskStatus;

    use super::*;

    fn contract() -> PreContract {
        PreContract {
            packet_id: "pkt-demo-001".to_string(),
            base_ref: "main".to_string(),
            budgets: Budgets {
                iteration_budget: 3,
                time_minutes: None,
            },
            actions: PreContractActions { test: None },
            plan_card: PlanCard {
                why: "because".to_string(),
                what: "a change".to_string(),
            },
        }
    }

    fn work_queue() -> WorkQueue {
        WorkQueue {
            version: "dome.work.queue/v0.2".to_string(),
            run_id: RunId::new("pkt-demo-001"),
            base_ref: "main".to_string(),
            max_workers: 3,
            tasks: vec![Task {
                task_id: TaskId::new("pkt-demo-001-plan"),
                goal: "plan".to_string(),
                status: TaskStatus::Queued,
                dependencies: BTreeSet::new(),
                worker_model: None,
                priority: None,
                created_at: None,
                payload_digest: None,
                requested_method: None,
                tool_contract: None,
                spawn_spec: None,
                extra: serde_json::Map::new(),
            }],
        }
    }

    #[test]
    fn builds_a_manifest_with_populated_hashes() {
        let manifest = build_run_manifest(
            &contract(),
            &work_queue(),
            &serde_json::json!({"version": "0.2.0"}),
            &ReasonCodeCatalog::default_catalog(),
            RuntimeFingerprint::capture(None),
            vec!["plan".to_string(), "dispatch".to_string()],
            BTreeMap::from([("summary".to_string(), "runs/pkt-demo-001/summary.json".to_string())]),
        );
        assert_eq!(manifest.run_id, "pkt-demo-001");
        assert_eq!(manifest.commands, vec!["plan".to_string(), "dispatch".to_string()]);
        assert!(!manifest.input_hashes.pre_contract.is_empty());
        assert!(!manifest.input_hashes.work_queue.is_empty());
        assert_ne!(manifest.input_hashes.pre_contract, manifest.input_hashes.work_queue);
    }

    #[test]
    fn capturing_a_runtime_fingerprint_fills_basic_fields() {
        let fingerprint = RuntimeFingerprint::capture(Some("deadbeef".to_string()));
        assert_eq!(fingerprint.repo_commit.as_deref(), Some("deadbeef"));
        assert!(!fingerprint.platform.is_empty());
        assert!(fingerprint.tool_versions.contains_key("taskgate-run"));
    }
}
