// taskgate-eventbus/src/bus.rs
// ============================================================================
// Module: Taskgate Event Bus
// Description: Topic-addressed pub/sub with deduplication and a durable
// JSON-lines event log.
// Purpose: Serve as the single source of orchestration truth: every
// component observes what happened only through events published here.
// Dependencies: taskgate-core, serde_json, rand, thiserror
// ============================================================================

//! ## Overview
//! [`EventBus`] mirrors the orchestrator's `EventBus` class: [`EventBus::subscribe`]
//! hands back a fan-out delivery queue, [`EventBus::publish`] deduplicates by
//! `event_id`, assigns a process-monotonic `sequence`, fans the event out to
//! every subscriber of its topic, and appends one JSON line to the durable
//! log when one is configured. Unlike the single shared queue per topic in
//! the original, each [`EventBus::subscribe`] call returns an independent
//! queue so every subscriber observes every event published after it
//! subscribed, not a competing share of one queue.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rand::RngCore;
use serde_json::Value;
use taskgate_core::RunId;
use taskgate_core::hex_encode;
use taskgate_core::model::Event;
use thiserror::Error;

use crate::clock::utc_now_iso;

/// Schema version stamped on every event this bus constructs.
pub const EVENT_SCHEMA_VERSION: &str = "0.2.0";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the event bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The durable log's parent directory could not be created.
    #[error("failed to create event log directory: {0}")]
    CreateDir(#[source] std::io::Error),
    /// Opening or writing the durable log failed.
    #[error("failed to write event log: {0}")]
    Log(#[source] std::io::Error),
    /// Serializing an event for the durable log failed.
    #[error("failed to serialize event: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The bus's internal lock was poisoned by a panicking holder.
    #[error("event bus lock poisoned")]
    LockPoisoned,
}

// ============================================================================
// SECTION: Topic Queue
// ============================================================================

/// A process-local FIFO delivery queue returned by [`EventBus::subscribe`].
#[derive(Clone)]
pub struct TopicQueue {
    inner: Arc<Mutex<VecDeque<Event>>>,
}

impl TopicQueue {
    /// Pops the oldest undelivered event, if any.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::LockPoisoned`] if a prior holder panicked
    /// while holding the queue's lock.
    pub fn pop(&self) -> Result<Option<Event>, EventBusError> {
        let mut queue = self.inner.lock().map_err(|_| EventBusError::LockPoisoned)?;
        Ok(queue.pop_front())
    }

    /// Drains every currently queued event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::LockPoisoned`] if a prior holder panicked
    /// while holding the queue's lock.
    pub fn drain(&self) -> Result<Vec<Event>, EventBusError> {
        let mut queue = self.inner.lock().map_err(|_| EventBusError::LockPoisoned)?;
        Ok(queue.drain(..).collect())
    }
}

// ============================================================================
// SECTION: Event Bus
// ============================================================================

struct EventBusState {
    topics: HashMap<String, Vec<Arc<Mutex<VecDeque<Event>>>>>,
    seen_event_ids: HashSet<String>,
    sequence: u64,
}

/// In-process pub/sub bus with optional durable event persistence.
pub struct EventBus {
    state: Mutex<EventBusState>,
    event_log: Option<PathBuf>,
}

impl EventBus {
    /// Builds a new bus, optionally backed by a durable JSON-lines log.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CreateDir`] if the log's parent directory
    /// cannot be created.
    pub fn new(event_log: Option<PathBuf>) -> Result<Self, EventBusError> {
        if let Some(path) = &event_log {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(EventBusError::CreateDir)?;
            }
        }
        Ok(Self {
            state: Mutex::new(EventBusState {
                topics: HashMap::new(),
                seen_event_ids: HashSet::new(),
                sequence: 0,
            }),
            event_log,
        })
    }

    /// Returns a new delivery queue observing every event published on
    /// `topic` from this call onward.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::LockPoisoned`] if a prior holder panicked
    /// while holding the bus's lock.
    pub fn subscribe(&self, topic: &str) -> Result<TopicQueue, EventBusError> {
        let mut state = self.state.lock().map_err(|_| EventBusError::LockPoisoned)?;
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        state.topics.entry(topic.to_string()).or_default().push(queue.clone());
        Ok(TopicQueue { inner: queue })
    }

    /// Publishes `event`, deduplicating by `event.event_id`.
    ///
    /// Assigns a process-monotonic sequence, fans the event out to every
    /// queue subscribed to `event.topic`, and appends a JSON line to the
    /// durable log when one is configured. Returns the assigned sequence, or
    /// `None` when the event was a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Log`] or [`EventBusError::Serialize`] if the
    /// durable log write fails; the caller must not consider the event
    /// published in that case.
    pub fn publish(&self, mut event: Event) -> Result<Option<u64>, EventBusError> {
        let mut state = self.state.lock().map_err(|_| EventBusError::LockPoisoned)?;
        if state.seen_event_ids.contains(event.event_id.as_str()) {
            return Ok(None);
        }
        state.sequence += 1;
        let sequence = state.sequence;
        event.sequence = sequence;
        state.seen_event_ids.insert(event.event_id.clone());

        if let Some(queues) = state.topics.get(&event.topic) {
            for queue in queues {
                if let Ok(mut queue) = queue.lock() {
                    queue.push_back(event.clone());
                }
            }
        }

        if let Some(path) = &self.event_log {
            append_event_line(path, &event)?;
        }

        Ok(Some(sequence))
    }

    /// Builds an [`Event`] with a freshly generated `event_id` and current
    /// timestamp, leaving `sequence` unassigned (`0`) until [`EventBus::publish`]
    /// assigns it.
    #[must_use]
    pub fn new_event(topic: impl Into<String>, run_id: RunId, payload: Value) -> Event {
        Event {
            schema_version: EVENT_SCHEMA_VERSION.to_string(),
            sequence: 0,
            event_id: format!("evt-{}", random_hex(16)),
            ts: utc_now_iso(),
            topic: topic.into(),
            run_id,
            payload,
        }
    }
}

/// Returns `byte_len` random bytes, hex-encoded.
fn random_hex(byte_len: usize) -> String {
    let mut bytes = vec![0_u8; byte_len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Appends one JSON line for `event` to `path`, matching the durable log's
/// field order and atomicity expectations (each append is its own write).
fn append_event_line(path: &Path, event: &Event) -> Result<(), EventBusError> {
    let mut line = serde_json::to_string(event).map_err(EventBusError::Serialize)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path).map_err(EventBusError::Log)?;
    file.write_all(line.as_bytes()).map_err(EventBusError::Log)?;
    file.sync_all().map_err(EventBusError::Log)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use tempfile::tempdir;

    use super::EventBus;
    use taskgate_core::RunId;

    #[test]
    fn subscribers_each_observe_every_event_published_after_subscribing() {
        let bus = EventBus::new(None).unwrap();
        let first = bus.subscribe("task.assigned").unwrap();
        let event = EventBus::new_event("task.assigned", RunId::new("run-1"), serde_json::json!({}));
        bus.publish(event).unwrap();
        let second = bus.subscribe("task.assigned").unwrap();
        let event = EventBus::new_event("task.assigned", RunId::new("run-1"), serde_json::json!({}));
        bus.publish(event).unwrap();

        assert_eq!(first.drain().unwrap().len(), 2);
        assert_eq!(second.drain().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_event_id_is_a_no_op() {
        let bus = EventBus::new(None).unwrap();
        let queue = bus.subscribe("task.assigned").unwrap();
        let mut event = EventBus::new_event("task.assigned", RunId::new("run-1"), serde_json::json!({}));
        event.event_id = "evt-fixed".to_string();
        assert!(bus.publish(event.clone()).unwrap().is_some());
        assert!(bus.publish(event).unwrap().is_none());
        assert_eq!(queue.drain().unwrap().len(), 1);
    }

    #[test]
    fn sequence_is_monotonic_across_topics() {
        let bus = EventBus::new(None).unwrap();
        let first =
            bus.publish(EventBus::new_event("a", RunId::new("run-1"), serde_json::json!({}))).unwrap();
        let second =
            bus.publish(EventBus::new_event("b", RunId::new("run-1"), serde_json::json!({}))).unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
    }

    #[test]
    fn durable_log_persists_one_line_per_event() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("events.jsonl");
        let bus = EventBus::new(Some(log_path.clone())).unwrap();
        bus.publish(EventBus::new_event("a", RunId::new("run-1"), serde_json::json!({"x": 1})))
            .unwrap();
        bus.publish(EventBus::new_event("b", RunId::new("run-1"), serde_json::json!({"x": 2})))
            .unwrap();
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn concurrent_publishers_each_get_a_distinct_event_id_and_sequence() {
        use std::sync::Arc;
        use std::thread;

        const PUBLISHERS: usize = 200;

        let bus = Arc::new(EventBus::new(None).unwrap());
        let queue = bus.subscribe("task.assigned").unwrap();
        let handles: Vec<_> = (0..PUBLISHERS)
            .map(|_| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    bus.publish(EventBus::new_event("task.assigned", RunId::new("run-1"), serde_json::json!({})))
                        .unwrap()
                        .expect("a freshly generated event_id is never a duplicate")
                })
            })
            .collect();
        let sequences: Vec<u64> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

        let unique_sequences: std::collections::HashSet<_> = sequences.iter().copied().collect();
        assert_eq!(unique_sequences.len(), PUBLISHERS, "every publisher must be assigned a distinct sequence");

        let delivered = queue.drain().unwrap();
        assert_eq!(delivered.len(), PUBLISHERS);
        let unique_event_ids: std::collections::HashSet<_> = delivered.iter().map(|event| event.event_id.clone()).collect();
        assert_eq!(unique_event_ids.len(), PUBLISHERS, "every delivered event must have a distinct event_id");
    }
}
