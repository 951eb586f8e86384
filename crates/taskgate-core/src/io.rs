// taskgate-core/src/io.rs
// ============================================================================
// Module: Taskgate Atomic I/O
// Description: Write-then-rename helpers for durable run artifacts.
// Purpose: Guarantee that a reader never observes a partially written file.
// Dependencies: serde, serde_json, tempfile, thiserror
// ============================================================================

//! ## Overview
//! Every durable run artifact (work queue, summary, gate decision, state
//! space, evidence bundle, ...) is written through [`atomic_write_text`] or
//! [`atomic_write_json`]: a sibling temp file in the same directory is
//! written, flushed, and renamed into place, so a crash mid-write never
//! leaves a half-written file at the final path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the atomic-write helpers.
#[derive(Debug, Error)]
pub enum AtomicWriteError {
    /// The destination's parent directory could not be created.
    #[error("failed to create parent directory: {0}")]
    CreateDir(#[source] std::io::Error),
    /// The sibling temp file could not be created.
    #[error("failed to create temp file: {0}")]
    CreateTemp(#[source] std::io::Error),
    /// Writing to the temp file failed.
    #[error("failed to write temp file: {0}")]
    Write(#[source] std::io::Error),
    /// Renaming the temp file into place failed.
    #[error("failed to persist temp file: {0}")]
    Persist(#[source] std::io::Error),
    /// Serializing the payload to JSON failed.
    #[error("failed to serialize json payload: {0}")]
    Serialize(#[source] serde_json::Error),
}

// ============================================================================
// SECTION: Atomic Write
// ============================================================================

/// Writes `content` to `path` atomically: a sibling temp file in the same
/// directory is written, fsynced, then renamed over `path`.
///
/// # Errors
///
/// Returns [`AtomicWriteError`] if any step of the write-then-rename
/// sequence fails. On error, `path` is left untouched.
pub fn atomic_write_text(path: &Path, content: &str) -> Result<(), AtomicWriteError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(AtomicWriteError::CreateDir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name(path)))
        .tempfile_in(parent)
        .map_err(AtomicWriteError::CreateTemp)?;

    temp.write_all(content.as_bytes()).map_err(AtomicWriteError::Write)?;
    temp.as_file_mut().sync_all().map_err(AtomicWriteError::Write)?;
    temp.persist(path).map_err(|err| AtomicWriteError::Persist(err.error))?;
    Ok(())
}

/// Serializes `payload` as pretty-printed JSON (with a trailing newline) and
/// writes it atomically.
///
/// # Errors
///
/// Returns [`AtomicWriteError`] if serialization or the underlying write
/// fails.
pub fn atomic_write_json<T: Serialize + ?Sized>(
    path: &Path,
    payload: &T,
) -> Result<(), AtomicWriteError> {
    let mut content = serde_json::to_string_pretty(payload).map_err(AtomicWriteError::Serialize)?;
    content.push('\n');
    atomic_write_text(path, &content)
}

/// Returns the final path component as a string, falling back to `"file"`
/// for paths ending in `..` or with no file name.
fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("file")
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::atomic_write_json;
    use super::atomic_write_text;

    #[test]
    fn writes_text_and_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("file.txt");
        atomic_write_text(&path, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn overwrites_existing_file_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        atomic_write_json(&path, &json!({"a": 1})).unwrap();
        atomic_write_json(&path, &json!({"a": 2})).unwrap();
        let read_back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read_back["a"], 2);
    }
}
