// taskgate-core/src/model.rs
// ============================================================================
// Module: Taskgate Data Model
// Description: Canonical record types shared by the planner, dispatcher,
// harness, checker, promoter, state writer, and tool daemon.
// Purpose: Provide stable, serializable types that are the single source of
// truth for any derived surface (CLI, HTTP, fact store).
// Dependencies: crate::{identifiers, status}, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! These types mirror `spec` §3's data model exactly. Validation lives next
//! to the type it guards (`WorkQueue::validate`, `SpawnSpec::validate`)
//! rather than in a separate module, following the scenario-spec convention.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::identifiers::RunId;
use crate::identifiers::TaskId;
use crate::status::GateStatus;

// ============================================================================
// SECTION: Pre-Contract
// ============================================================================

/// Budget constraints carried by a pre-contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budgets {
    /// Maximum number of plan/implement/verify iterations.
    pub iteration_budget: u32,
    /// Optional wall-clock budget in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_minutes: Option<u32>,
}

/// The test/verify command carried by a pre-contract's `actions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestAction {
    /// A single shell command string.
    Command(String),
    /// An argv vector.
    Argv(Vec<String>),
}

/// Actions a pre-contract may request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreContractActions {
    /// Verify command, present only when a verify task should be planned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<TestAction>,
}

/// Narrative context for a plan, carried through to the run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCard {
    /// Why this work is being done.
    pub why: String,
    /// What this work changes.
    pub what: String,
}

/// A high-level objective handed to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreContract {
    /// Source of the run's identifier.
    pub packet_id: String,
    /// Base ref the work is planned against.
    pub base_ref: String,
    /// Resource budgets for the run.
    pub budgets: Budgets,
    /// Requested actions.
    pub actions: PreContractActions,
    /// Plan narrative.
    pub plan_card: PlanCard,
}

impl PreContract {
    /// Derives this pre-contract's run identifier from `packet_id`.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        RunId::new(self.packet_id.clone())
    }
}

// ============================================================================
// SECTION: Task / Work Queue
// ============================================================================

/// Task lifecycle status as carried on [`Task::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Queued, not yet claimed.
    Queued,
    /// Claimed by the dispatcher.
    Claimed,
    /// Actively running.
    Running,
    /// Gated; awaiting promotion.
    Gated,
    /// Terminal success.
    Done,
    /// Terminal failure or escalation.
    Blocked,
}

/// Tool contract restricting which methods a task may request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContract {
    /// Methods this task is permitted to invoke.
    pub allowed_methods: Vec<String>,
}

/// Action specification nested in a [`SpawnSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Non-empty description of the intended action.
    pub intent: String,
}

/// Exact-shape spawn specification for a task, when present.
///
/// # Invariants
/// - Contains exactly the fields below, no more and no fewer (enforced by
///   `#[serde(deny_unknown_fields)]`).
/// - `run_id` must equal the owning work queue's `run_id` ([`SpawnSpec::validate`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpawnSpec {
    /// Owning run identifier; must equal the work queue's `run_id`.
    pub run_id: RunId,
    /// Dispatch wave identifier.
    pub wave_id: String,
    /// Node identifier within the wave.
    pub node_id: String,
    /// Node execution identifier.
    pub node_execution_id: String,
    /// Reference to the originating task spec.
    pub task_spec_ref: String,
    /// Reference to the tool profile used.
    pub tool_profile_ref: String,
    /// Reference to the execution container.
    pub container_ref: String,
    /// The action this spawn performs.
    pub action_spec: ActionSpec,
    /// Deterministic seed for reproducible execution.
    pub determinism_seed: String,
    /// Hash of the spawn's inputs.
    pub inputs_hash: String,
}

/// Errors raised validating a [`SpawnSpec`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpawnSpecError {
    /// `action_spec.intent` was empty.
    #[error("spawn_spec.action_spec.intent must be non-empty")]
    EmptyIntent,
    /// `run_id` did not match the owning work queue.
    #[error("spawn_spec.run_id ({spawn_run_id}) does not match work queue run_id ({queue_run_id})")]
    RunIdMismatch {
        /// The spawn spec's own `run_id`.
        spawn_run_id: String,
        /// The owning work queue's `run_id`.
        queue_run_id: String,
    },
}

impl SpawnSpec {
    /// Validates that `intent` is non-empty and `run_id` matches the owning
    /// work queue.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnSpecError`] on a failed invariant.
    pub fn validate(&self, queue_run_id: &RunId) -> Result<(), SpawnSpecError> {
        if self.action_spec.intent.trim().is_empty() {
            return Err(SpawnSpecError::EmptyIntent);
        }
        if &self.run_id != queue_run_id {
            return Err(SpawnSpecError::RunIdMismatch {
                spawn_run_id: self.run_id.to_string(),
                queue_run_id: queue_run_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Keys that may never appear directly on a [`Task`] (direct tool invocation
/// leaks authority that must instead flow through `tool_contract`).
pub const FORBIDDEN_TASK_KEYS: [&str; 4] = ["method", "tool_method", "raw_call", "command"];

/// A unit of work within a [`WorkQueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier within the work queue.
    pub task_id: TaskId,
    /// Human-readable goal description.
    pub goal: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Task identifiers this task depends on.
    pub dependencies: BTreeSet<TaskId>,
    /// Worker model override, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_model: Option<String>,
    /// Scheduling priority, used in the tie-break key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// ISO-8601 creation timestamp, used in the tie-break key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Digest of the task's payload, used in the tie-break key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_digest: Option<String>,
    /// Method this task requests permission to invoke, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_method: Option<String>,
    /// Tool contract listing methods this task is permitted to invoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_contract: Option<ToolContract>,
    /// Spawn specification, when this task dispatches a spawned worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_spec: Option<SpawnSpec>,
    /// Arbitrary extra fields, preserved so forbidden-key detection can
    /// inspect keys the typed fields above do not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Errors raised validating a [`Task`]'s tool-contract guard.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskContractError {
    /// The task carries a forbidden direct-invocation key.
    #[error("task {task_id} carries forbidden key: {key}")]
    ForbiddenKey {
        /// The offending task.
        task_id: String,
        /// The forbidden key found on the task.
        key: String,
    },
    /// A requested method has no matching entry in `tool_contract.allowed_methods`.
    #[error("task {task_id} requested method {method} without a matching tool contract entry")]
    UnauthorizedMethod {
        /// The offending task.
        task_id: String,
        /// The requested method.
        method: String,
    },
}

impl Task {
    /// Checks this task's forbidden-key and tool-contract invariants.
    ///
    /// # Errors
    ///
    /// Returns [`TaskContractError`] when a forbidden key is present or a
    /// requested method is not covered by the tool contract.
    pub fn validate_tool_contract(&self) -> Result<(), TaskContractError> {
        for key in FORBIDDEN_TASK_KEYS {
            if self.extra.contains_key(key) {
                return Err(TaskContractError::ForbiddenKey {
                    task_id: self.task_id.to_string(),
                    key: key.to_string(),
                });
            }
        }
        if let Some(method) = self.requested_method() {
            let allowed = self
                .tool_contract
                .as_ref()
                .is_some_and(|contract| contract.allowed_methods.iter().any(|m| m == method));
            if !allowed {
                return Err(TaskContractError::UnauthorizedMethod {
                    task_id: self.task_id.to_string(),
                    method: method.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolves the method this task asks permission to invoke, checking the
    /// typed `requested_method` field first and falling back to a nested
    /// `tool_call.method` string carried in [`Task::extra`] (`spec` §4.6).
    #[must_use]
    pub fn requested_method(&self) -> Option<&str> {
        if let Some(method) = &self.requested_method {
            return Some(method.as_str());
        }
        self.extra.get("tool_call")?.get("method")?.as_str()
    }

    /// Returns the 4-tuple tie-break key `(priority, created_at,
    /// payload_digest, task_id)` used for deterministic scheduling (`spec`
    /// §4.6).
    #[must_use]
    pub fn tiebreak_key(&self) -> (String, String, String, String) {
        (
            self.priority.clone().unwrap_or_else(|| "normal".to_string()),
            self.created_at.clone().unwrap_or_default(),
            self.payload_digest.clone().unwrap_or_default(),
            self.task_id.to_string(),
        )
    }
}

/// An ordered, validated sequence of tasks derived from a pre-contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkQueue {
    /// Work queue schema version.
    pub version: String,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Base ref the work is planned against.
    pub base_ref: String,
    /// Maximum number of concurrent workers per wave.
    pub max_workers: u32,
    /// Tasks in planner-assigned order.
    pub tasks: Vec<Task>,
}

/// Errors raised validating a [`WorkQueue`]'s task graph (`validate_task_graph`).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkQueueError {
    /// The work queue has no tasks.
    #[error("work queue must contain at least one task")]
    Empty,
    /// `max_workers` was zero.
    #[error("max_workers must be at least 1")]
    NoWorkers,
    /// Two tasks share a `task_id`.
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),
    /// A task names a dependency that does not exist.
    #[error("task {task_id} depends on unknown task {dependency}")]
    UnknownDependency {
        /// The task with the unresolved dependency.
        task_id: String,
        /// The missing dependency.
        dependency: String,
    },
    /// The dependency graph contains a cycle.
    #[error("task dependency graph contains a cycle at {0}")]
    Cycle(String),
}

impl WorkQueue {
    /// Validates structural and graph invariants (`spec` §4.5's
    /// `validate_task_graph`): non-empty unique task ids, every dependency
    /// resolves, and the graph is acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`WorkQueueError`] describing the first violation found.
    pub fn validate_task_graph(&self) -> Result<(), WorkQueueError> {
        if self.tasks.is_empty() {
            return Err(WorkQueueError::Empty);
        }
        if self.max_workers == 0 {
            return Err(WorkQueueError::NoWorkers);
        }
        ensure_unique_task_ids(&self.tasks)?;
        ensure_dependencies_resolve(&self.tasks)?;
        ensure_acyclic(&self.tasks)?;
        Ok(())
    }
}

/// Ensures task identifiers are unique within the work queue.
fn ensure_unique_task_ids(tasks: &[Task]) -> Result<(), WorkQueueError> {
    for (index, task) in tasks.iter().enumerate() {
        if tasks.iter().skip(index + 1).any(|other| other.task_id == task.task_id) {
            return Err(WorkQueueError::DuplicateTaskId(task.task_id.to_string()));
        }
    }
    Ok(())
}

/// Ensures every dependency names a task present in the work queue.
fn ensure_dependencies_resolve(tasks: &[Task]) -> Result<(), WorkQueueError> {
    for task in tasks {
        for dependency in &task.dependencies {
            if !tasks.iter().any(|other| &other.task_id == dependency) {
                return Err(WorkQueueError::UnknownDependency {
                    task_id: task.task_id.to_string(),
                    dependency: dependency.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Three-color DFS cycle check over the dependency graph.
fn ensure_acyclic(tasks: &[Task]) -> Result<(), WorkQueueError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Temporary,
        Permanent,
    }

    fn visit<'a>(
        task_id: &'a TaskId,
        tasks: &'a [Task],
        marks: &mut std::collections::BTreeMap<&'a TaskId, Mark>,
    ) -> Result<(), WorkQueueError> {
        match marks.get(task_id) {
            Some(Mark::Permanent) => return Ok(()),
            Some(Mark::Temporary) => return Err(WorkQueueError::Cycle(task_id.to_string())),
            None => {}
        }
        marks.insert(task_id, Mark::Temporary);
        if let Some(task) = tasks.iter().find(|t| &t.task_id == task_id) {
            for dependency in &task.dependencies {
                visit(dependency, tasks, marks)?;
            }
        }
        marks.insert(task_id, Mark::Permanent);
        Ok(())
    }

    let mut marks = std::collections::BTreeMap::new();
    for task in tasks {
        visit(&task.task_id, tasks, &mut marks)?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Attempts & Results
// ============================================================================

/// Outcome of a single worker attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    /// The attempt succeeded.
    Pass,
    /// The attempt failed.
    Fail,
}

/// The full record of one worker attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Attempt outcome.
    pub status: AttemptStatus,
    /// Reason code, when the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    /// Free-form diagnostic notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Attempt duration in milliseconds.
    pub duration_ms: u64,
    /// Backoff applied before this attempt, when retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// The complete outcome of a task after retries are exhausted or a
/// non-transient result is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: TaskId,
    /// Final attempt status.
    pub status: AttemptStatus,
    /// Total number of attempts made.
    pub attempts: u32,
    /// Complete ordered attempt history.
    pub attempt_history: Vec<AttemptRecord>,
    /// Backoff applied before each retried attempt, in order.
    pub retry_backoff_ms: Vec<u64>,
    /// Final reason code, when the task failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    /// Worker model that produced this result.
    pub worker_model: String,
    /// Whether the final status was a transient failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transient: Option<bool>,
    /// Path to the task's evidence bundle.
    pub evidence_bundle_path: String,
    /// Path to the task's attempt-history file.
    pub attempt_history_path: String,
    /// Path to the task's dead-letter record, when transient retries were exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq_path: Option<String>,
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// An event published on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event schema version.
    pub schema_version: String,
    /// Process-monotonic sequence number, assigned by the publishing bus.
    pub sequence: u64,
    /// Globally unique event identifier.
    pub event_id: String,
    /// UTC ISO-8601 `Z` timestamp.
    pub ts: String,
    /// Topic the event was published on.
    pub topic: String,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Event payload.
    pub payload: Value,
}

/// Canonical event bus topic names.
pub mod topics {
    /// A dispatch wave was created.
    pub const PLAN_WAVE_CREATED: &str = "plan.wave.created";
    /// A task was assigned to a worker.
    pub const TASK_ASSIGNED: &str = "task.assigned";
    /// One per attempt; raw per-attempt result.
    pub const TASK_RESULT_RAW: &str = "task.result.raw";
    /// One per task; final result.
    pub const TASK_RESULT: &str = "task.result";
    /// A gate evaluation was requested.
    pub const GATE_REQUESTED: &str = "gate.requested";
    /// A gate decision was reached.
    pub const GATE_VERDICT: &str = "gate.verdict";
    /// A promotion decision was reached.
    pub const PROMOTION_DECISION: &str = "promotion.decision";
}

// ============================================================================
// SECTION: Evidence
// ============================================================================

/// Telemetry reference embedded in an evidence bundle and gate/promotion decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRef {
    /// 32 lowercase hex characters.
    pub trace_id_hex: String,
    /// 16 lowercase hex characters.
    pub span_id_hex: String,
}

/// OpenTelemetry-shaped provenance carried by an evidence bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtelRef {
    /// Telemetry backend label.
    pub backend: String,
    /// 32 lowercase hex characters.
    pub trace_id_hex: String,
    /// 16 lowercase hex characters.
    pub span_id_hex: String,
    /// Project label.
    pub project: String,
    /// Owning run identifier.
    pub run_id: RunId,
}

/// A content-hashed artifact referenced by an evidence bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceArtifact {
    /// Artifact path, relative to the run root.
    pub path: String,
    /// SHA-256 hex digest of the artifact's contents.
    pub sha256: String,
    /// Artifact size in bytes.
    pub bytes: u64,
}

/// Per-task evidence document; the only permitted provenance for state updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    /// OpenTelemetry-shaped provenance.
    pub otel: OtelRef,
    /// Free-form signal map (`run.id`, `task.id`, `task.status`, ...).
    pub signals: Value,
    /// Content-hashed sibling artifacts.
    pub artifacts: Vec<EvidenceArtifact>,
}

/// Errors raised validating an [`EvidenceBundle`]'s telemetry invariant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvidenceBundleError {
    /// `trace_id_hex` was not exactly 32 lowercase hex characters.
    #[error("evidence bundle trace_id_hex must be 32 lowercase hex characters")]
    InvalidTraceId,
    /// `span_id_hex` was not exactly 16 lowercase hex characters.
    #[error("evidence bundle span_id_hex must be 16 lowercase hex characters")]
    InvalidSpanId,
}

impl EvidenceBundle {
    /// Validates `spec` §3's invariant that every evidence bundle contains a
    /// well-formed `otel.trace_id_hex` (32 hex) and `otel.span_id_hex` (16 hex).
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceBundleError`] when either field is malformed.
    pub fn validate(&self) -> Result<(), EvidenceBundleError> {
        if !is_lowercase_hex_of_len(&self.otel.trace_id_hex, 32) {
            return Err(EvidenceBundleError::InvalidTraceId);
        }
        if !is_lowercase_hex_of_len(&self.otel.span_id_hex, 16) {
            return Err(EvidenceBundleError::InvalidSpanId);
        }
        Ok(())
    }
}

/// Returns true when `value` is exactly `len` lowercase hex characters.
fn is_lowercase_hex_of_len(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

// ============================================================================
// SECTION: Gate & Promotion Decisions
// ============================================================================

/// The checker's verdict for a dispatch wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Gate decision schema version.
    pub version: String,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Fixed synthetic task identifier, always `"wave-gate"`.
    pub task_id: String,
    /// Gate status.
    pub status: GateStatus,
    /// Fixed translation of `status` (`spec` GLOSSARY "Substrate status").
    pub substrate_status: crate::status::SubstrateStatus,
    /// Reason codes, validated against the catalog before persist.
    pub reason_codes: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Integer risk score.
    pub risk_score: i64,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Vec<String>,
    /// Telemetry reference (live span or deterministic fallback).
    pub telemetry_ref: TelemetryRef,
}

/// The promoter's final decision for a dispatch wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    /// Promotion decision schema version.
    pub version: String,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Promotion decision status.
    pub decision: GateStatus,
    /// Reason codes carried through from (or appended to) the gate decision.
    pub reason_codes: Vec<String>,
    /// Confidence carried through from the gate decision.
    pub confidence: f64,
    /// Risk score carried through from the gate decision.
    pub risk_score: i64,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Vec<String>,
    /// Reference back to the gate decision this promotion was derived from.
    pub gate_decision_ref: GateDecisionRef,
}

/// Minimal back-reference to the gate decision a promotion was derived
/// from, carrying its task id and telemetry reference rather than a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecisionRef {
    /// The gate decision's synthetic task identifier.
    pub task_id: String,
    /// The gate decision's telemetry reference.
    pub telemetry_ref: TelemetryRef,
}

// ============================================================================
// SECTION: Tool Daemon Job / Event Records
// ============================================================================

/// Tool daemon job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, not yet started.
    Queued,
    /// Actively executing.
    Running,
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed,
    /// Terminal cancellation.
    Canceled,
}

impl JobState {
    /// Returns true for any of the three terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Tool daemon job-lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The job's state changed.
    StateChange,
    /// A log line was emitted.
    Log,
    /// A guard/validation event was emitted.
    Guard,
    /// An error was emitted.
    Error,
}

/// A single event scoped to a tool daemon job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Per-job sequence number, strictly increasing from 1, no gaps.
    pub seq: u64,
    /// Event kind.
    pub event_type: EventType,
    /// Event payload.
    pub payload: Value,
    /// Unix epoch timestamp (fractional seconds).
    pub ts_epoch: f64,
}

/// A job tracked by the tool daemon's state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier.
    pub job_id: crate::identifiers::JobId,
    /// Run identifier synthesized at submission.
    pub run_id: RunId,
    /// Current lifecycle state.
    pub state: JobState,
    /// Requested skill identifier.
    pub skill_id: String,
    /// Execution profile.
    pub profile: String,
    /// Client-supplied idempotency key.
    pub idempotency_key: crate::identifiers::IdempotencyKey,
    /// Canonical hash of the originating request.
    pub request_hash: String,
    /// Produced artifact paths.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Events recorded against this job.
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::AttemptStatus;
    use super::EvidenceBundle;
    use super::EvidenceBundleError;
    use super::OtelRef;
    use super::SpawnSpec;
    use super::SpawnSpecError;
    use super::Task;
    use super::TaskContractError;
    use super::TaskStatus;
    use super::ToolContract;
    use super::WorkQueue;
    use super::WorkQueueError;
    use crate::identifiers::RunId;
    use crate::identifiers::TaskId;

    fn plain_task(id: &str, deps: &[&str]) -> Task {
        Task {
            task_id: TaskId::new(id),
            goal: "goal".to_string(),
            status: TaskStatus::Queued,
            dependencies: deps.iter().map(|d| TaskId::new(*d)).collect(),
            worker_model: None,
            priority: None,
            created_at: None,
            payload_digest: None,
            requested_method: None,
            tool_contract: None,
            spawn_spec: None,
            extra: serde_json::Map::new(),
        }
    }

    fn queue_with(tasks: Vec<Task>) -> WorkQueue {
        WorkQueue {
            version: "dome.work.queue/v0.2".to_string(),
            run_id: RunId::new("run-1"),
            base_ref: "main".to_string(),
            max_workers: 2,
            tasks,
        }
    }

    #[test]
    fn rejects_empty_queue() {
        let queue = queue_with(vec![]);
        assert_eq!(queue.validate_task_graph(), Err(WorkQueueError::Empty));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let queue = queue_with(vec![plain_task("a", &["missing"])]);
        assert!(matches!(
            queue.validate_task_graph(),
            Err(WorkQueueError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn rejects_cycle() {
        let queue = queue_with(vec![plain_task("a", &["b"]), plain_task("b", &["a"])]);
        assert!(matches!(queue.validate_task_graph(), Err(WorkQueueError::Cycle(_))));
    }

    #[test]
    fn accepts_valid_linear_chain() {
        let queue = queue_with(vec![
            plain_task("plan", &[]),
            plain_task("implement", &["plan"]),
            plain_task("verify", &["implement"]),
        ]);
        assert!(queue.validate_task_graph().is_ok());
    }

    #[test]
    fn tool_contract_guard_rejects_forbidden_key() {
        let mut task = plain_task("a", &[]);
        task.extra.insert("command".to_string(), serde_json::json!("rm -rf /"));
        assert!(matches!(
            task.validate_tool_contract(),
            Err(TaskContractError::ForbiddenKey { .. })
        ));
    }

    #[test]
    fn tool_contract_guard_rejects_unlisted_method() {
        let mut task = plain_task("a", &[]);
        task.requested_method = Some("deploy".to_string());
        task.tool_contract = Some(ToolContract {
            allowed_methods: vec!["build".to_string()],
        });
        assert!(matches!(
            task.validate_tool_contract(),
            Err(TaskContractError::UnauthorizedMethod { .. })
        ));
    }

    #[test]
    fn tool_contract_guard_accepts_listed_method() {
        let mut task = plain_task("a", &[]);
        task.requested_method = Some("build".to_string());
        task.tool_contract = Some(ToolContract {
            allowed_methods: vec!["build".to_string()],
        });
        assert!(task.validate_tool_contract().is_ok());
    }

    #[test]
    fn spawn_spec_rejects_empty_intent() {
        let spawn = SpawnSpec {
            run_id: RunId::new("run-1"),
            wave_id: "wave-1".to_string(),
            node_id: "node-1".to_string(),
            node_execution_id: "exec-1".to_string(),
            task_spec_ref: "ref".to_string(),
            tool_profile_ref: "ref".to_string(),
            container_ref: "ref".to_string(),
            action_spec: super::ActionSpec {
                intent: String::new(),
            },
            determinism_seed: "seed".to_string(),
            inputs_hash: "hash".to_string(),
        };
        assert_eq!(spawn.validate(&RunId::new("run-1")), Err(SpawnSpecError::EmptyIntent));
    }

    #[test]
    fn spawn_spec_rejects_run_id_mismatch() {
        let spawn = SpawnSpec {
            run_id: RunId::new("run-1"),
            wave_id: "wave-1".to_string(),
            node_id: "node-1".to_string(),
            node_execution_id: "exec-1".to_string(),
            task_spec_ref: "ref".to_string(),
            tool_profile_ref: "ref".to_string(),
            container_ref: "ref".to_string(),
            action_spec: super::ActionSpec {
                intent: "do it".to_string(),
            },
            determinism_seed: "seed".to_string(),
            inputs_hash: "hash".to_string(),
        };
        assert!(matches!(
            spawn.validate(&RunId::new("run-2")),
            Err(SpawnSpecError::RunIdMismatch { .. })
        ));
    }

    #[test]
    fn evidence_bundle_requires_valid_trace_and_span_ids() {
        let bundle = EvidenceBundle {
            otel: OtelRef {
                backend: "deterministic".to_string(),
                trace_id_hex: "a".repeat(32),
                span_id_hex: "b".repeat(16),
                project: "taskgate".to_string(),
                run_id: RunId::new("run-1"),
            },
            signals: serde_json::json!({}),
            artifacts: vec![],
        };
        assert!(bundle.validate().is_ok());

        let mut bad = bundle;
        bad.otel.trace_id_hex = "too-short".to_string();
        assert_eq!(bad.validate(), Err(EvidenceBundleError::InvalidTraceId));
    }

    #[test]
    fn attempt_status_round_trips_json() {
        let value = serde_json::to_value(AttemptStatus::Pass).unwrap();
        assert_eq!(value, serde_json::json!("PASS"));
    }
}
