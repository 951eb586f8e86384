// taskgate-memory/src/checkpoint.rs
// ============================================================================
// Module: Materializer Checkpoint
// Description: Tracks which run directories the materializer has already
// folded into the fact store, so a restart resumes rather than re-upserts
// everything from the beginning.
// Purpose: Back the materializer's discover/diff/advance cycle.
// Dependencies: serde_json, std::fs
// ============================================================================

//! ## Overview
//! The checkpoint is a single JSON file holding `{"processed_runs": [...]}`.
//! [`discover_runs`] lists every run directory under a root; [`pending_runs`]
//! is the set difference against the checkpoint's `processed_runs`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use taskgate_core::atomic_write_json;

/// Errors raised loading or saving a checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The checkpoint file exists but could not be read.
    #[error("failed to read checkpoint: {0}")]
    Read(#[source] std::io::Error),
    /// The checkpoint file did not parse as JSON.
    #[error("failed to parse checkpoint: {0}")]
    Parse(#[source] serde_json::Error),
    /// The checkpoint could not be written back to disk.
    #[error("failed to write checkpoint: {0}")]
    Write(#[source] taskgate_core::AtomicWriteError),
    /// The run root directory could not be listed.
    #[error("failed to list run root {path}: {source}")]
    ListRunRoot {
        /// The directory that could not be listed.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Checkpoint state: which run ids have already been materialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Run ids already folded into the fact store, kept sorted and deduped.
    pub processed_runs: Vec<String>,
}

impl Checkpoint {
    /// Marks `run_id` processed, keeping the list sorted and deduplicated.
    pub fn mark_processed(&mut self, run_id: &str) {
        if !self.processed_runs.iter().any(|existing| existing == run_id) {
            self.processed_runs.push(run_id.to_string());
        }
        self.processed_runs.sort();
        self.processed_runs.dedup();
    }
}

/// Loads a checkpoint from `path`, returning an empty checkpoint when the
/// file does not exist yet.
///
/// # Errors
///
/// Returns [`CheckpointError`] if the file exists but cannot be read or
/// parsed.
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
    if !path.exists() {
        return Ok(Checkpoint::default());
    }
    let raw = std::fs::read_to_string(path).map_err(CheckpointError::Read)?;
    serde_json::from_str(&raw).map_err(CheckpointError::Parse)
}

/// Atomically persists `checkpoint` to `path`.
///
/// # Errors
///
/// Returns [`CheckpointError`] if the write fails.
pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
    atomic_write_json(path, checkpoint).map_err(CheckpointError::Write)
}

/// Lists the names of every subdirectory directly under `run_root`, sorted.
/// Returns an empty vector when `run_root` does not exist yet.
///
/// # Errors
///
/// Returns [`CheckpointError`] if `run_root` exists but cannot be listed.
pub fn discover_runs(run_root: &Path) -> Result<Vec<String>, CheckpointError> {
    if !run_root.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(run_root)
        .map_err(|source| CheckpointError::ListRunRoot { path: run_root.to_path_buf(), source })?;
    let mut runs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CheckpointError::ListRunRoot { path: run_root.to_path_buf(), source })?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                runs.push(name.to_string());
            }
        }
    }
    runs.sort();
    Ok(runs)
}

/// Returns the run ids in `discovered` that are not already in `processed`.
#[must_use]
pub fn pending_runs(discovered: &[String], processed: &[String]) -> Vec<String> {
    discovered.iter().filter(|run_id| !processed.contains(run_id)).cloned().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;

    #[test]
    fn a_missing_checkpoint_loads_as_empty() {
        let checkpoint = load_checkpoint(Path::new("/nonexistent/checkpoint.json")).unwrap();
        assert!(checkpoint.processed_runs.is_empty());
    }

    #[test]
    fn a_saved_checkpoint_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = Checkpoint::default();
        checkpoint.mark_processed("run-b");
        checkpoint.mark_processed("run-a");
        checkpoint.mark_processed("run-a");
        save_checkpoint(&path, &checkpoint).unwrap();
        let loaded = load_checkpoint(&path).unwrap();
        assert_eq!(loaded.processed_runs, vec!["run-a".to_string(), "run-b".to_string()]);
    }

    #[test]
    fn discover_runs_lists_only_directories_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("run-2")).unwrap();
        std::fs::create_dir(dir.path().join("run-1")).unwrap();
        std::fs::write(dir.path().join("not-a-run.txt"), "x").unwrap();
        let runs = discover_runs(dir.path()).unwrap();
        assert_eq!(runs, vec!["run-1".to_string(), "run-2".to_string()]);
    }

    #[test]
    fn pending_runs_is_the_set_difference() {
        let discovered = vec!["run-1".to_string(), "run-2".to_string(), "run-3".to_string()];
        let processed = vec!["run-2".to_string()];
        assert_eq!(pending_runs(&discovered, &processed), vec!["run-1".to_string(), "run-3".to_string()]);
    }
}
