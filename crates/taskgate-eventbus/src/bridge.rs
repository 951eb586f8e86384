// taskgate-eventbus/src/bridge.rs
// ============================================================================
// Module: Taskgate A2A Transport Bridge
// Description: Normalizes generic agent-to-agent envelopes into bus topics.
// Purpose: Demonstrate that the event bus, not the transport, is the single
// source of orchestration truth.
// Dependencies: taskgate-core, serde_json
// ============================================================================

//! ## Overview
//! An [`A2aEnvelope`] carries a `kind` string from an external transport. The
//! bridge looks `kind` up in a fixed table and republishes the envelope's
//! payload on the matching internal topic; unmatched kinds are dropped and
//! counted, never forwarded as-is.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use taskgate_core::model::Event;
use taskgate_core::model::topics;

use crate::bus::EventBus;
use crate::bus::EventBusError;

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// A generic agent-to-agent envelope, as received from an external transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aEnvelope {
    /// Transport-level message kind (e.g. `"worker.task.result"`).
    pub kind: String,
    /// Owning run identifier.
    pub run_id: String,
    /// Message payload.
    pub payload: serde_json::Value,
    /// Transport-supplied timestamp, not reused by the bridged event (the
    /// bus assigns its own `ts` on publish).
    pub ts: String,
}

/// Maps a transport `kind` to its internal topic, or `None` if unknown.
#[must_use]
pub fn kind_to_topic(kind: &str) -> Option<&'static str> {
    match kind {
        "planner.wave.created" => Some(topics::PLAN_WAVE_CREATED),
        "worker.task.assigned" => Some(topics::TASK_ASSIGNED),
        "worker.task.result" => Some(topics::TASK_RESULT),
        "gate.verdict" => Some(topics::GATE_VERDICT),
        "promotion.decision" => Some(topics::PROMOTION_DECISION),
        _ => None,
    }
}

// ============================================================================
// SECTION: Bridge
// ============================================================================

/// Relay counters accumulated across [`A2aMcpBridge::relay`] calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Number of envelopes successfully republished on the bus.
    pub relayed: u64,
    /// Number of envelopes dropped for an unrecognized `kind`.
    pub dropped: u64,
}

/// Bridges [`A2aEnvelope`] messages onto an [`EventBus`].
pub struct A2aMcpBridge<'a> {
    bus: &'a EventBus,
    stats: BridgeStats,
}

impl<'a> A2aMcpBridge<'a> {
    /// Builds a bridge publishing onto `bus`.
    #[must_use]
    pub fn new(bus: &'a EventBus) -> Self {
        Self {
            bus,
            stats: BridgeStats::default(),
        }
    }

    /// Returns the accumulated relay statistics.
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Relays a single envelope, publishing it on the matching topic.
    /// Returns the published [`Event`] when relayed, or `None` when the
    /// envelope's `kind` was unrecognized (and counted as dropped).
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if the underlying publish fails.
    pub fn relay(&mut self, envelope: A2aEnvelope) -> Result<Option<Event>, EventBusError> {
        let Some(topic) = kind_to_topic(&envelope.kind) else {
            self.stats.dropped += 1;
            return Ok(None);
        };
        let event = EventBus::new_event(
            topic,
            taskgate_core::RunId::new(envelope.run_id),
            envelope.payload,
        );
        self.bus.publish(event.clone())?;
        self.stats.relayed += 1;
        Ok(Some(event))
    }

    /// Relays every envelope in `envelopes`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if any underlying publish fails; envelopes
    /// already relayed before the failing one remain published.
    pub fn relay_all(&mut self, envelopes: Vec<A2aEnvelope>) -> Result<BridgeStats, EventBusError> {
        for envelope in envelopes {
            self.relay(envelope)?;
        }
        Ok(self.stats)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::A2aEnvelope;
    use super::A2aMcpBridge;
    use crate::bus::EventBus;

    #[test]
    fn relays_known_kind_and_drops_unknown() {
        let bus = EventBus::new(None).unwrap();
        let mut bridge = A2aMcpBridge::new(&bus);

        let relayed = bridge
            .relay(A2aEnvelope {
                kind: "worker.task.result".to_string(),
                run_id: "run-1".to_string(),
                payload: serde_json::json!({"status": "PASS"}),
                ts: "2024-01-01T00:00:00.000Z".to_string(),
            })
            .unwrap();
        assert!(relayed.is_some());

        let dropped = bridge
            .relay(A2aEnvelope {
                kind: "unknown.kind".to_string(),
                run_id: "run-1".to_string(),
                payload: serde_json::json!({}),
                ts: "2024-01-01T00:00:00.000Z".to_string(),
            })
            .unwrap();
        assert!(dropped.is_none());

        assert_eq!(bridge.stats().relayed, 1);
        assert_eq!(bridge.stats().dropped, 1);
    }
}
