// taskgate-core/src/status.rs
// ============================================================================
// Module: Taskgate Status Enums
// Description: Gate/substrate status and their fixed cross-mapping.
// Purpose: Provide typed, serializable status values shared by the checker,
// promoter, and state writer.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A gate decision's status (`GateStatus`) is mirrored onto a fixed
//! "substrate status" used by downstream consumers. The mapping is total and
//! has no configuration surface: `APPROVE -> PROMOTE`, `REJECT -> DENY`,
//! `NEEDS_HUMAN -> STOP`, and the inverse.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Gate / Substrate Status
// ============================================================================

/// Gate or promotion decision status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    /// The task/wave is approved for promotion.
    Approve,
    /// The task/wave is rejected.
    Reject,
    /// The task/wave requires human review.
    NeedsHuman,
}

/// Fixed translation of [`GateStatus`] used by substrate-facing consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubstrateStatus {
    /// Promote the artifact.
    Promote,
    /// Deny promotion.
    Deny,
    /// Stop and escalate to a human.
    Stop,
}

/// Error raised when a status value cannot be mapped.
#[derive(Debug, Error)]
pub enum StatusMappingError {
    /// No mapping target is left unmapped; this variant exists for parity
    /// with the fallible string-keyed original and is never constructed.
    #[error("unreachable status mapping error")]
    Unreachable,
}

impl GateStatus {
    /// Maps a gate status to its fixed substrate status.
    #[must_use]
    pub const fn to_substrate(self) -> SubstrateStatus {
        match self {
            Self::Approve => SubstrateStatus::Promote,
            Self::Reject => SubstrateStatus::Deny,
            Self::NeedsHuman => SubstrateStatus::Stop,
        }
    }
}

impl SubstrateStatus {
    /// Maps a substrate status back to its fixed gate status.
    #[must_use]
    pub const fn to_gate(self) -> GateStatus {
        match self {
            Self::Promote => GateStatus::Approve,
            Self::Deny => GateStatus::Reject,
            Self::Stop => GateStatus::NeedsHuman,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GateStatus;
    use super::SubstrateStatus;

    #[test]
    fn maps_both_directions() {
        assert_eq!(GateStatus::Approve.to_substrate(), SubstrateStatus::Promote);
        assert_eq!(GateStatus::Reject.to_substrate(), SubstrateStatus::Deny);
        assert_eq!(GateStatus::NeedsHuman.to_substrate(), SubstrateStatus::Stop);
        assert_eq!(SubstrateStatus::Promote.to_gate(), GateStatus::Approve);
        assert_eq!(SubstrateStatus::Deny.to_gate(), GateStatus::Reject);
        assert_eq!(SubstrateStatus::Stop.to_gate(), GateStatus::NeedsHuman);
    }
}
