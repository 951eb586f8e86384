// taskgate-core/src/audit.rs
// ============================================================================
// Module: Taskgate Audit Logging
// Description: Structured audit events emitted by the pipeline and daemon.
// Purpose: Provide a pluggable, redaction-aware logging surface without
// pulling in a tracing/log framework.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Taskgate has no `tracing`/`log` dependency. Instead, each component that
//! wants to emit a structured log line builds an [`AuditEvent`] and hands it
//! to an [`AuditSink`]. Deployments choose a sink (`NoopAuditSink` for tests,
//! `StderrAuditSink` for local runs, `FileAuditSink` for durable JSON-lines
//! logs) without the rest of the pipeline knowing the difference.
//!
//! Every event's `payload` must already be passed through
//! [`crate::security::redact_sensitive_payload`] by the caller before it
//! reaches a sink; sinks themselves do not re-redact.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Event
// ============================================================================

/// A single structured audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: u128,
    /// Component that emitted the event (e.g. `"dispatcher"`, `"checker"`).
    pub component: &'static str,
    /// Event kind within the component (e.g. `"wave_dispatched"`, `"gate_verdict"`).
    pub kind: &'static str,
    /// Run identifier, when the event is scoped to a run.
    pub run_id: Option<String>,
    /// Task identifier, when the event is scoped to a task.
    pub task_id: Option<String>,
    /// Already-redacted event payload.
    pub payload: Value,
}

impl AuditEvent {
    /// Builds a new audit event with the current timestamp.
    #[must_use]
    pub fn new(component: &'static str, kind: &'static str, payload: Value) -> Self {
        let timestamp_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            timestamp_ms,
            component,
            kind,
            run_id: None,
            task_id: None,
            payload,
        }
    }

    /// Sets the run identifier.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Sets the task identifier.
    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

// ============================================================================
// SECTION: Sink
// ============================================================================

/// A pluggable destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Records an audit event.
    fn record(&self, event: &AuditEvent);
}

/// Sink that discards every event. Used in tests and wherever audit output
/// is not wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Sink that writes one JSON line per event to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Sink that appends one JSON line per event to a file.
pub struct FileAuditSink {
    /// Open file handle, guarded for concurrent callers.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens (or creates) `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) {
        let Ok(payload) = serde_json::to_string(event) else {
            return;
        };
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        let _ = writeln!(file, "{payload}");
        let _ = file.flush();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::AuditEvent;
    use super::AuditSink;
    use super::FileAuditSink;
    use super::NoopAuditSink;

    #[test]
    fn noop_sink_accepts_any_event() {
        let sink = NoopAuditSink;
        sink.record(&AuditEvent::new("checker", "gate_verdict", json!({"status": "APPROVE"})));
    }

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = FileAuditSink::new(&path).unwrap();
        sink.record(
            &AuditEvent::new("dispatcher", "wave_dispatched", json!({"wave": 1}))
                .with_run_id("run-1"),
        );
        sink.record(&AuditEvent::new("dispatcher", "wave_dispatched", json!({"wave": 2})));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().next().unwrap().contains("\"run_id\":\"run-1\""));
    }
}
