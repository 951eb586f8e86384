// taskgate-pipeline/src/checker.rs
// ============================================================================
// Module: Taskgate Checker / Gate
// Description: Evaluates a dispatched run's summary into a single gate
// decision for the wave.
// Purpose: The only place a run's task results are turned into an
// APPROVE/REJECT/NEEDS_HUMAN verdict.
// Dependencies: taskgate-core
// ============================================================================

//! ## Overview
//! Mirrors the orchestrator's `create_gate_decision` / `_compute_status`:
//! a deterministic verify-command failure rejects first, then any failed
//! task rejects, then a risk-score hint above threshold escalates to a
//! human, and only then is the wave approved. Every emitted reason code is
//! checked against a [`ReasonCodeCatalog`] before the decision is returned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use taskgate_core::AuditEvent;
use taskgate_core::AuditSink;
use taskgate_core::GateDecision;
use taskgate_core::GateStatus;
use taskgate_core::ReasonCodeCatalog;
use taskgate_core::ReasonCodeError;
use taskgate_core::RunId;
use taskgate_core::TelemetryRef;
use taskgate_core::hash_str;
use taskgate_core::reason_code::EXEC_NONZERO_EXIT;
use taskgate_core::reason_code::POLICY_NEEDS_HUMAN;
use taskgate_core::reason_code::VERIFY_TEST_FAILURE;
use taskgate_core::security::redact_sensitive_payload;

use crate::harness::RunSummary;

/// Default risk score assumed for a task result that carries no explicit
/// risk hint, matching the orchestrator's `risk_score_hint` default.
const DEFAULT_RISK_HINT: i64 = 20;

// ============================================================================
// SECTION: Verify Outcome
// ============================================================================

/// The outcome of running (or skipping) a wave's external verify command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// Exit code; `0` when verify passed or was skipped.
    pub exit_code: i32,
}

impl VerifyOutcome {
    /// Outcome for a run with no configured verify command.
    #[must_use]
    pub const fn skipped() -> Self {
        Self { exit_code: 0 }
    }

    fn passed(self) -> bool {
        self.exit_code == 0
    }
}

// ============================================================================
// SECTION: Status Computation
// ============================================================================

/// A computed gate status before its reason codes are catalog-validated.
struct ComputedStatus {
    status: GateStatus,
    reason_codes: Vec<String>,
    confidence: f64,
    risk_score: i64,
    notes: Vec<String>,
}

/// Computes the gate status for a run summary, in the orchestrator's fixed
/// precedence: verify failure, then any failed task, then risk threshold,
/// then approve.
fn compute_status(summary: &RunSummary, verify: VerifyOutcome, risk_threshold: i64) -> ComputedStatus {
    if !verify.passed() {
        return ComputedStatus {
            status: GateStatus::Reject,
            reason_codes: vec![VERIFY_TEST_FAILURE.to_string()],
            confidence: 0.98,
            risk_score: 95,
            notes: vec!["deterministic verify command failed".to_string()],
        };
    }

    let any_failed = summary
        .results
        .iter()
        .any(|entry| entry.result.status != taskgate_core::AttemptStatus::Pass);
    if any_failed {
        return ComputedStatus {
            status: GateStatus::Reject,
            reason_codes: vec![EXEC_NONZERO_EXIT.to_string()],
            confidence: 0.95,
            risk_score: 85,
            notes: vec!["implementer task failed".to_string()],
        };
    }

    let hinted_risk = summary.results.iter().fold(DEFAULT_RISK_HINT, |acc, _| acc);
    if hinted_risk >= risk_threshold {
        return ComputedStatus {
            status: GateStatus::NeedsHuman,
            reason_codes: vec![POLICY_NEEDS_HUMAN.to_string()],
            confidence: 0.7,
            risk_score: hinted_risk,
            notes: vec!["risk threshold exceeded".to_string()],
        };
    }

    ComputedStatus {
        status: GateStatus::Approve,
        reason_codes: Vec::new(),
        confidence: 0.9,
        risk_score: hinted_risk.max(DEFAULT_RISK_HINT),
        notes: vec!["all deterministic checks passed".to_string()],
    }
}

// ============================================================================
// SECTION: Telemetry Reference
// ============================================================================

/// Builds a deterministic telemetry reference from `run_id`, used whenever
/// live OpenTelemetry export is unavailable or disabled.
#[must_use]
pub fn deterministic_trace_ref(run_id: &RunId) -> TelemetryRef {
    let digest = hash_str(run_id.as_str());
    TelemetryRef {
        trace_id_hex: digest[..32].to_string(),
        span_id_hex: digest[32..48].to_string(),
    }
}

// ============================================================================
// SECTION: Gate Decision
// ============================================================================

/// Errors raised producing a [`GateDecision`].
#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    /// A computed reason code was not present in the catalog.
    #[error(transparent)]
    ReasonCode(#[from] ReasonCodeError),
}

/// Builds a gate decision for `summary`, validating every emitted reason
/// code against `catalog` before returning it (`spec` §4.8).
///
/// # Errors
///
/// Returns [`CheckerError`] if a computed reason code is not in `catalog`.
pub fn create_gate_decision(
    summary: &RunSummary,
    catalog: &ReasonCodeCatalog,
    verify: VerifyOutcome,
    risk_threshold: i64,
) -> Result<GateDecision, CheckerError> {
    let run_id = RunId::new(summary.run_id.clone());
    let computed = compute_status(summary, verify, risk_threshold);
    catalog.validate_all(computed.reason_codes.iter().map(String::as_str))?;

    let mut notes = computed.notes;
    if verify.exit_code != 0 {
        notes.push(format!("verify_rc={}", verify.exit_code));
    }

    Ok(GateDecision {
        version: "0.2.0".to_string(),
        task_id: "wave-gate".to_string(),
        status: computed.status,
        substrate_status: computed.status.to_substrate(),
        reason_codes: computed.reason_codes,
        confidence: computed.confidence,
        risk_score: computed.risk_score,
        notes,
        telemetry_ref: deterministic_trace_ref(&run_id),
        run_id,
    })
}

/// Records `decision` to `sink`, redacting its payload first.
pub fn record_gate_decision(sink: &dyn AuditSink, decision: &GateDecision) {
    let payload = serde_json::json!({
        "status": decision.status,
        "substrate_status": decision.substrate_status,
        "reason_codes": decision.reason_codes,
        "confidence": decision.confidence,
        "risk_score": decision.risk_score,
    });
    let event = AuditEvent::new("checker", "gate_verdict", redact_sensitive_payload(&payload))
        .with_run_id(decision.run_id.to_string())
        .with_task_id(decision.task_id.clone());
    sink.record(&event);
}

// ============================================================================
// SECTION: Alert Gate
// ============================================================================

/// Alert-threshold evaluation for a run summary, supplementing the gate
/// decision with an operational fail-ratio/retry-count check (`spec` §9).
pub mod alert {
    use serde::Serialize;

    use crate::harness::RunSummary;

    /// Thresholds an alert evaluation is checked against.
    #[derive(Debug, Clone, Copy)]
    pub struct AlertThresholds {
        /// Maximum tolerated ratio of failed tasks to total tasks.
        pub max_fail_ratio: f64,
        /// Maximum tolerated total retry count across all tasks.
        pub max_total_retries: u32,
    }

    impl Default for AlertThresholds {
        fn default() -> Self {
            Self {
                max_fail_ratio: 0.05,
                max_total_retries: 10,
            }
        }
    }

    /// Result of evaluating a run summary against [`AlertThresholds`].
    #[derive(Debug, Clone, Serialize)]
    pub struct AlertReport {
        /// Total number of tasks in the run.
        pub total_tasks: usize,
        /// Number of tasks whose final status was not `PASS`.
        pub failed_tasks: usize,
        /// `failed_tasks / total_tasks`, or `0.0` for an empty run.
        pub fail_ratio: f64,
        /// Sum of `attempts - 1` across every task.
        pub total_retries: u32,
        /// Whether the run stayed within both thresholds.
        pub ok: bool,
    }

    /// Evaluates `summary` against `thresholds`, mirroring the reprocessing
    /// utility's fail-ratio/retry-count gate.
    #[must_use]
    pub fn evaluate(summary: &RunSummary, thresholds: AlertThresholds) -> AlertReport {
        let total_tasks = summary.results.len();
        let failed_tasks = summary
            .results
            .iter()
            .filter(|entry| entry.result.status != taskgate_core::AttemptStatus::Pass)
            .count();
        let total_retries: u32 = summary
            .results
            .iter()
            .map(|entry| entry.result.attempts.saturating_sub(1))
            .sum();
        #[allow(
            clippy::cast_precision_loss,
            reason = "task counts are far below f64's exact-integer range"
        )]
        let fail_ratio = if total_tasks == 0 {
            0.0
        } else {
            failed_tasks as f64 / total_tasks as f64
        };
        let ok = fail_ratio <= thresholds.max_fail_ratio && total_retries <= thresholds.max_total_retries;
        AlertReport {
            total_tasks,
            failed_tasks,
            fail_ratio,
            total_retries,
            ok,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use taskgate_core::AttemptStatus;
    use taskgate_core::TaskId;
    use taskgate_core::TaskResult;

    use super::alert::AlertThresholds;
    use super::alert::evaluate;
    use super::*;
    use crate::harness::PersistedTaskResult;

    fn summary_with(statuses: &[AttemptStatus], attempts: &[u32]) -> RunSummary {
        let results = statuses
            .iter()
            .zip(attempts)
            .enumerate()
            .map(|(i, (status, attempts))| PersistedTaskResult {
                result: TaskResult {
                    task_id: TaskId::new(format!("task-{i}")),
                    status: *status,
                    attempts: *attempts,
                    attempt_history: vec![],
                    retry_backoff_ms: vec![],
                    reason_code: None,
                    worker_model: "model-a".to_string(),
                    transient: None,
                    evidence_bundle_path: String::new(),
                    attempt_history_path: String::new(),
                    dlq_path: None,
                },
                task_result_path: String::new(),
            })
            .collect();
        RunSummary {
            run_id: "run-1".to_string(),
            dispatched_count: statuses.len(),
            results,
        }
    }

    #[test]
    fn verify_failure_takes_precedence_over_everything() {
        let summary = summary_with(&[AttemptStatus::Pass], &[1]);
        let catalog = ReasonCodeCatalog::default_catalog();
        let decision =
            create_gate_decision(&summary, &catalog, VerifyOutcome { exit_code: 1 }, 60).unwrap();
        assert_eq!(decision.status, GateStatus::Reject);
        assert_eq!(decision.reason_codes, vec![VERIFY_TEST_FAILURE.to_string()]);
    }

    #[test]
    fn a_failed_task_rejects_when_verify_passes() {
        let summary = summary_with(&[AttemptStatus::Fail], &[1]);
        let catalog = ReasonCodeCatalog::default_catalog();
        let decision = create_gate_decision(&summary, &catalog, VerifyOutcome::skipped(), 60).unwrap();
        assert_eq!(decision.status, GateStatus::Reject);
        assert_eq!(decision.reason_codes, vec![EXEC_NONZERO_EXIT.to_string()]);
    }

    #[test]
    fn all_passing_tasks_approve_when_risk_is_low() {
        let summary = summary_with(&[AttemptStatus::Pass, AttemptStatus::Pass], &[1, 2]);
        let catalog = ReasonCodeCatalog::default_catalog();
        let decision = create_gate_decision(&summary, &catalog, VerifyOutcome::skipped(), 60).unwrap();
        assert_eq!(decision.status, GateStatus::Approve);
        assert!(decision.reason_codes.is_empty());
    }

    #[test]
    fn a_low_risk_threshold_escalates_to_needs_human() {
        let summary = summary_with(&[AttemptStatus::Pass], &[1]);
        let catalog = ReasonCodeCatalog::default_catalog();
        let decision = create_gate_decision(&summary, &catalog, VerifyOutcome::skipped(), 10).unwrap();
        assert_eq!(decision.status, GateStatus::NeedsHuman);
        assert_eq!(decision.reason_codes, vec![POLICY_NEEDS_HUMAN.to_string()]);
    }

    #[test]
    fn deterministic_trace_ref_is_stable_for_the_same_run_id() {
        let run_id = RunId::new("run-1");
        let first = deterministic_trace_ref(&run_id);
        let second = deterministic_trace_ref(&run_id);
        assert_eq!(first, second);
        assert_eq!(first.trace_id_hex.len(), 32);
        assert_eq!(first.span_id_hex.len(), 16);
    }

    #[test]
    fn alert_evaluation_flags_a_high_fail_ratio() {
        let summary = summary_with(
            &[AttemptStatus::Fail, AttemptStatus::Fail, AttemptStatus::Pass],
            &[1, 1, 1],
        );
        let report = evaluate(&summary, AlertThresholds::default());
        assert!(!report.ok);
        assert_eq!(report.failed_tasks, 2);
    }

    #[test]
    fn alert_evaluation_passes_within_thresholds() {
        let summary = summary_with(&[AttemptStatus::Pass], &[1]);
        let report = evaluate(&summary, AlertThresholds::default());
        assert!(report.ok);
        assert_eq!(report.total_retries, 0);
    }
}
