// taskgate-eventbus/src/lib.rs
// ============================================================================
// Module: Taskgate Event Bus Library
// Description: Public API surface for the event bus, replay helpers, and
// transport bridge.
// Purpose: Give the pipeline, tool daemon, and memory layer a single shared
// notion of "what happened, in what order."
// Dependencies: crate::{bus, bridge, clock, replay}
// ============================================================================

//! ## Overview
//! Taskgate treats the event bus as the single source of orchestration
//! truth: the dispatcher, harness, checker, and promoter publish; the
//! memory materializer and binder replay. See [`bus::EventBus`] for the
//! live pub/sub contract and [`replay`] for read-only reconstruction.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod bridge;
pub mod bus;
pub mod clock;
pub mod replay;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bridge::A2aEnvelope;
pub use bridge::A2aMcpBridge;
pub use bridge::BridgeStats;
pub use bridge::kind_to_topic;

pub use bus::EVENT_SCHEMA_VERSION;
pub use bus::EventBus;
pub use bus::EventBusError;
pub use bus::TopicQueue;

pub use clock::format_unix_millis_iso;
pub use clock::utc_now_iso;

pub use replay::ControlLedger;
pub use replay::ReplayError;
pub use replay::load_envelopes;
pub use replay::materialize_control_ledger;
pub use replay::replay_task_results;
