// taskgate-eventbus/src/replay.rs
// ============================================================================
// Module: Taskgate Event Bus Replay
// Description: Reconstructs ordered event history from the durable log.
// Purpose: Let any component rebuild state purely from what was published,
// without re-running the pipeline.
// Dependencies: taskgate-core, serde_json
// ============================================================================

//! ## Overview
//! Three read-only helpers over the durable JSON-lines log: [`load_envelopes`]
//! loads and sorts every line, [`replay_task_results`] filters to the two
//! task-result topics, and [`materialize_control_ledger`] folds an event
//! sequence into a deterministic summary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use serde::Serialize;
use taskgate_core::model::Event;
use taskgate_core::model::topics;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised reading or parsing the durable event log.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The log file could not be read.
    #[error("failed to read event log: {0}")]
    Read(#[source] std::io::Error),
    /// A line in the log was not valid JSON, or did not match the event shape.
    #[error("failed to parse event log line {line_number}: {source}")]
    Parse {
        /// 1-based line number of the offending line.
        line_number: usize,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// SECTION: Load / Filter
// ============================================================================

/// Loads every event from `log`, optionally filtered to `run_id`, sorted by
/// `(sequence, ts, event_id)`. Returns an empty vector when `log` does not
/// exist yet (mirrors a run that has not published anything).
///
/// # Errors
///
/// Returns [`ReplayError`] if the file exists but cannot be read, or a line
/// fails to parse as an [`Event`].
pub fn load_envelopes(log: &Path, run_id: Option<&str>) -> Result<Vec<Event>, ReplayError> {
    if !log.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(log).map_err(ReplayError::Read)?;
    let mut events = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(line).map_err(|source| ReplayError::Parse {
            line_number: index + 1,
            source,
        })?;
        if run_id.is_some_and(|wanted| event.run_id.as_str() != wanted) {
            continue;
        }
        events.push(event);
    }
    events.sort_by(|a, b| (a.sequence, &a.ts, &a.event_id).cmp(&(b.sequence, &b.ts, &b.event_id)));
    Ok(events)
}

/// Returns every `task.result.raw` and `task.result` event for `run_id`,
/// in the same order [`load_envelopes`] would return them.
///
/// # Errors
///
/// Returns [`ReplayError`] under the same conditions as [`load_envelopes`].
pub fn replay_task_results(log: &Path, run_id: &str) -> Result<Vec<Event>, ReplayError> {
    let events = load_envelopes(log, Some(run_id))?;
    Ok(events
        .into_iter()
        .filter(|event| event.topic == topics::TASK_RESULT_RAW || event.topic == topics::TASK_RESULT)
        .collect())
}

// ============================================================================
// SECTION: Control Ledger
// ============================================================================

/// Deterministic summary folded from a run's event sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlLedger {
    /// Number of `task.assigned` events observed.
    pub assigned_count: u64,
    /// Payload of the last `gate.verdict` event, if any.
    pub last_gate_verdict: Option<serde_json::Value>,
    /// Payload of the last `promotion.decision` event, if any.
    pub last_promotion_decision: Option<serde_json::Value>,
}

/// Folds `events` (in the order given — callers should pass
/// [`load_envelopes`]'s output) into a [`ControlLedger`].
#[must_use]
pub fn materialize_control_ledger(events: &[Event]) -> ControlLedger {
    let mut ledger = ControlLedger {
        assigned_count: 0,
        last_gate_verdict: None,
        last_promotion_decision: None,
    };
    for event in events {
        match event.topic.as_str() {
            topics::TASK_ASSIGNED => ledger.assigned_count += 1,
            topics::GATE_VERDICT => ledger.last_gate_verdict = Some(event.payload.clone()),
            topics::PROMOTION_DECISION => ledger.last_promotion_decision = Some(event.payload.clone()),
            _ => {}
        }
    }
    ledger
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use tempfile::tempdir;

    use super::load_envelopes;
    use super::materialize_control_ledger;
    use super::replay_task_results;
    use crate::bus::EventBus;
    use taskgate_core::RunId;

    #[test]
    fn load_envelopes_is_empty_for_missing_log() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("missing.jsonl");
        assert_eq!(load_envelopes(&log, None).unwrap(), Vec::new());
    }

    #[test]
    fn load_envelopes_filters_by_run_id_and_sorts() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("events.jsonl");
        let bus = EventBus::new(Some(log.clone())).unwrap();
        bus.publish(EventBus::new_event("a", RunId::new("run-1"), serde_json::json!({})))
            .unwrap();
        bus.publish(EventBus::new_event("b", RunId::new("run-2"), serde_json::json!({})))
            .unwrap();
        bus.publish(EventBus::new_event("c", RunId::new("run-1"), serde_json::json!({})))
            .unwrap();

        let events = load_envelopes(&log, Some("run-1")).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    }

    #[test]
    fn replay_task_results_filters_to_result_topics() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("events.jsonl");
        let bus = EventBus::new(Some(log.clone())).unwrap();
        bus.publish(EventBus::new_event(
            "task.assigned",
            RunId::new("run-1"),
            serde_json::json!({}),
        ))
        .unwrap();
        bus.publish(EventBus::new_event(
            "task.result",
            RunId::new("run-1"),
            serde_json::json!({"status": "PASS"}),
        ))
        .unwrap();

        let results = replay_task_results(&log, "run-1").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].topic, "task.result");
    }

    #[test]
    fn materialize_control_ledger_counts_and_captures_last() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("events.jsonl");
        let bus = EventBus::new(Some(log.clone())).unwrap();
        bus.publish(EventBus::new_event(
            "task.assigned",
            RunId::new("run-1"),
            serde_json::json!({"task_id": "t1"}),
        ))
        .unwrap();
        bus.publish(EventBus::new_event(
            "task.assigned",
            RunId::new("run-1"),
            serde_json::json!({"task_id": "t2"}),
        ))
        .unwrap();
        bus.publish(EventBus::new_event(
            "gate.verdict",
            RunId::new("run-1"),
            serde_json::json!({"status": "APPROVE"}),
        ))
        .unwrap();
        bus.publish(EventBus::new_event(
            "promotion.decision",
            RunId::new("run-1"),
            serde_json::json!({"decision": "APPROVE"}),
        ))
        .unwrap();

        let events = load_envelopes(&log, Some("run-1")).unwrap();
        let ledger = materialize_control_ledger(&events);
        assert_eq!(ledger.assigned_count, 2);
        assert_eq!(ledger.last_gate_verdict, Some(serde_json::json!({"status": "APPROVE"})));
        assert_eq!(
            ledger.last_promotion_decision,
            Some(serde_json::json!({"decision": "APPROVE"}))
        );
    }
}
