// taskgate-memory/src/health.rs
// ============================================================================
// Module: Checkpoint Health
// Description: A minimal gate over the materializer's checkpoint file,
// usable as a deploy/drill precondition ("has memory caught up on enough
// runs to trust queries against it?").
// Purpose: Back a `taskgate memory checkpoint-health` CLI check.
// Dependencies: crate::checkpoint
// ============================================================================

//! ## Overview
//! Mirrors a standalone checkpoint-health script: a missing checkpoint
//! fails outright, otherwise the check passes when `processed_runs.len()`
//! is at least `min_processed_runs`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use serde::Serialize;

use crate::checkpoint::load_checkpoint;

/// Result of a checkpoint-health evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointHealth {
    /// Whether the check passed.
    pub ok: bool,
    /// Whether the checkpoint file existed at all.
    pub checkpoint_exists: bool,
    /// Number of runs recorded as processed.
    pub processed_runs: usize,
    /// The threshold the check was evaluated against.
    pub min_processed_runs: usize,
}

/// Evaluates checkpoint health at `checkpoint_path` against
/// `min_processed_runs`. A missing checkpoint always fails.
#[must_use]
pub fn evaluate(checkpoint_path: &Path, min_processed_runs: usize) -> CheckpointHealth {
    if !checkpoint_path.exists() {
        return CheckpointHealth { ok: false, checkpoint_exists: false, processed_runs: 0, min_processed_runs };
    }
    let processed_runs = load_checkpoint(checkpoint_path).map(|checkpoint| checkpoint.processed_runs.len()).unwrap_or(0);
    CheckpointHealth {
        ok: processed_runs >= min_processed_runs,
        checkpoint_exists: true,
        processed_runs,
        min_processed_runs,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::checkpoint::save_checkpoint;

    #[test]
    fn a_missing_checkpoint_fails_regardless_of_threshold() {
        let health = evaluate(Path::new("/nonexistent/checkpoint.json"), 0);
        assert!(!health.ok);
        assert!(!health.checkpoint_exists);
    }

    #[test]
    fn enough_processed_runs_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = Checkpoint::default();
        checkpoint.mark_processed("run-1");
        checkpoint.mark_processed("run-2");
        save_checkpoint(&path, &checkpoint).unwrap();
        let health = evaluate(&path, 2);
        assert!(health.ok);
        assert_eq!(health.processed_runs, 2);
    }

    #[test]
    fn too_few_processed_runs_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = Checkpoint::default();
        checkpoint.mark_processed("run-1");
        save_checkpoint(&path, &checkpoint).unwrap();
        let health = evaluate(&path, 5);
        assert!(!health.ok);
    }
}
