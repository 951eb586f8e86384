// taskgate-pipeline/src/promoter.rs
// ============================================================================
// Module: Taskgate Promoter
// Description: Applies promotion policy to a gate decision and records the
// result to an audit ledger.
// Purpose: The final arbiter of whether a wave's work is promoted, rejected,
// or escalated.
// Dependencies: taskgate-core
// ============================================================================

//! ## Overview
//! Mirrors the orchestrator's `create_promotion_decision`: a rejected gate
//! stays rejected, a gate that already needs a human stays escalated, and an
//! approved gate is re-checked against a minimum confidence and maximum risk
//! before being promoted. Every promotion decision is also recorded to an
//! [`taskgate_core::AuditSink`] so the ledger carries a full trail independent
//! of the event bus.

// ============================================================================
// SECTION: Imports
// ============================================================================

use taskgate_core::AuditEvent;
use taskgate_core::AuditSink;
use taskgate_core::GateDecision;
use taskgate_core::GateDecisionRef;
use taskgate_core::GateStatus;
use taskgate_core::PromotionDecision;
use taskgate_core::reason_code::POLICY_NEEDS_HUMAN;
use taskgate_core::redact_sensitive_payload;

/// Promotion policy thresholds.
#[derive(Debug, Clone, Copy)]
pub struct PromotionPolicy {
    /// Minimum confidence an approved gate must carry to be promoted.
    pub min_confidence: f64,
    /// Maximum risk score an approved gate may carry to be promoted.
    pub max_risk: i64,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            max_risk: 60,
        }
    }
}

/// Builds a promotion decision from `gate`, applying `policy` (`spec` §4.9).
#[must_use]
pub fn create_promotion_decision(gate: &GateDecision, policy: PromotionPolicy) -> PromotionDecision {
    let mut reason_codes = gate.reason_codes.clone();
    let decision = match gate.status {
        GateStatus::Reject => GateStatus::Reject,
        GateStatus::NeedsHuman => {
            ensure_needs_human_code(&mut reason_codes);
            GateStatus::NeedsHuman
        }
        GateStatus::Approve if gate.confidence < policy.min_confidence || gate.risk_score > policy.max_risk => {
            ensure_needs_human_code(&mut reason_codes);
            GateStatus::NeedsHuman
        }
        GateStatus::Approve => GateStatus::Approve,
    };

    PromotionDecision {
        version: "0.2.0".to_string(),
        run_id: gate.run_id.clone(),
        decision,
        reason_codes,
        confidence: gate.confidence,
        risk_score: gate.risk_score,
        notes: gate.notes.clone(),
        gate_decision_ref: GateDecisionRef {
            task_id: gate.task_id.clone(),
            telemetry_ref: gate.telemetry_ref.clone(),
        },
    }
}

fn ensure_needs_human_code(reason_codes: &mut Vec<String>) {
    if !reason_codes.iter().any(|code| code == POLICY_NEEDS_HUMAN) {
        reason_codes.push(POLICY_NEEDS_HUMAN.to_string());
    }
}

/// Records `decision` to `sink`, redacting its payload first.
pub fn record_promotion(sink: &dyn AuditSink, decision: &PromotionDecision) {
    let payload = serde_json::json!({
        "decision": decision.decision,
        "reason_codes": decision.reason_codes,
        "confidence": decision.confidence,
        "risk_score": decision.risk_score,
        "gate_decision_ref": {
            "task_id": decision.gate_decision_ref.task_id,
            "telemetry_ref": decision.gate_decision_ref.telemetry_ref,
        },
    });
    let event = AuditEvent::new("promoter", "promotion_decision", redact_sensitive_payload(&payload))
        .with_run_id(decision.run_id.to_string());
    sink.record(&event);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use std::sync::Mutex;

    use taskgate_core::RunId;
    use taskgate_core::TelemetryRef;

    use super::*;

    fn gate(status: GateStatus, confidence: f64, risk_score: i64) -> GateDecision {
        GateDecision {
            version: "0.2.0".to_string(),
            run_id: RunId::new("run-1"),
            task_id: "wave-gate".to_string(),
            status,
            substrate_status: status.to_substrate(),
            reason_codes: Vec::new(),
            confidence,
            risk_score,
            notes: Vec::new(),
            telemetry_ref: TelemetryRef {
                trace_id_hex: "0".repeat(32),
                span_id_hex: "0".repeat(16),
            },
        }
    }

    #[test]
    fn a_rejected_gate_stays_rejected() {
        let decision = create_promotion_decision(&gate(GateStatus::Reject, 0.9, 10), PromotionPolicy::default());
        assert_eq!(decision.decision, GateStatus::Reject);
    }

    #[test]
    fn a_needs_human_gate_carries_the_policy_reason_code() {
        let decision =
            create_promotion_decision(&gate(GateStatus::NeedsHuman, 0.9, 10), PromotionPolicy::default());
        assert_eq!(decision.decision, GateStatus::NeedsHuman);
        assert!(decision.reason_codes.contains(&POLICY_NEEDS_HUMAN.to_string()));
    }

    #[test]
    fn low_confidence_demotes_an_approval_to_needs_human() {
        let decision = create_promotion_decision(&gate(GateStatus::Approve, 0.5, 10), PromotionPolicy::default());
        assert_eq!(decision.decision, GateStatus::NeedsHuman);
    }

    #[test]
    fn high_risk_demotes_an_approval_to_needs_human() {
        let decision = create_promotion_decision(&gate(GateStatus::Approve, 0.9, 90), PromotionPolicy::default());
        assert_eq!(decision.decision, GateStatus::NeedsHuman);
    }

    #[test]
    fn a_confident_low_risk_approval_is_promoted() {
        let decision = create_promotion_decision(&gate(GateStatus::Approve, 0.9, 10), PromotionPolicy::default());
        assert_eq!(decision.decision, GateStatus::Approve);
        assert!(decision.reason_codes.is_empty());
    }

    struct RecordingSink(Mutex<Vec<String>>);

    impl AuditSink for RecordingSink {
        fn record(&self, event: &AuditEvent) {
            self.0.lock().unwrap().push(event.kind.to_string());
        }
    }

    #[test]
    fn record_promotion_emits_one_audit_event() {
        let sink = RecordingSink(Mutex::new(Vec::new()));
        let decision = create_promotion_decision(&gate(GateStatus::Approve, 0.9, 10), PromotionPolicy::default());
        record_promotion(&sink, &decision);
        assert_eq!(sink.0.lock().unwrap().as_slice(), ["promotion_decision"]);
    }
}
