// taskgate-core/src/identifiers.rs
// ============================================================================
// Module: Taskgate Identifiers
// Description: Canonical opaque identifiers for runs, tasks, events, and jobs.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! Taskgate. Identifiers are opaque and serialize as strings; validation of
//! their contents (if any) is handled at the boundary that constructs them,
//! not within these wrappers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Macro
// ============================================================================

macro_rules! newtype_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a new ", stringify!($name), ".")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the owned string.
            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

newtype_id!(RunId, "Run identifier, sourced from a pre-contract's `packet_id`.");
newtype_id!(TaskId, "Task identifier, unique within a work queue.");
newtype_id!(WaveId, "Dispatch wave identifier assigned by the supervisor.");
newtype_id!(EventId, "Globally unique event identifier used for bus deduplication.");
newtype_id!(JobId, "Tool daemon job identifier, synthesized as `job-<12hex>`.");
newtype_id!(ClientId, "Tool daemon client identifier scoping idempotency keys.");
newtype_id!(IdempotencyKey, "Client-supplied idempotency token.");
newtype_id!(ToolId, "Registered tool/skill identifier.");

#[cfg(test)]
mod tests {
    use super::TaskId;

    #[test]
    fn round_trips_through_display_and_from() {
        let id = TaskId::from("pkt-demo-001-plan");
        assert_eq!(id.as_str(), "pkt-demo-001-plan");
        assert_eq!(id.to_string(), "pkt-demo-001-plan");
    }

    #[test]
    fn orders_lexicographically() {
        let a = TaskId::new("t-a");
        let b = TaskId::new("t-b");
        assert!(a < b);
    }
}
