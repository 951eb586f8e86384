// taskgate-toold/src/daemon.rs
// ============================================================================
// Module: Tool Daemon Service
// Description: axum/SSE wire service exposing Health, ListCapabilities,
// ListTools, GetTool, SkillExecute, GetJobStatus, CancelJob, and
// StreamJobEvents over HTTP.
// Purpose: Give the orchestrator (and operators) a stable network surface
// for submitting and observing tool executions.
// Dependencies: axum, tokio, tokio-stream, serde, serde_json
// ============================================================================

//! ## Overview
//! [`ToolDaemon`] wraps a [`StateStore`], a [`ToolRegistry`], and an
//! [`Executor`] behind a small JSON/SSE API. Built-in sentinel skills never
//! reach the executor; every other tool is routed to it with the
//! `local_process` backend. Method names and error taxonomy follow the
//! original gRPC service exactly; only the transport (axum + SSE in place
//! of gRPC) differs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::Path as AxumPath;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use taskgate_core::AuditEvent;
use taskgate_core::AuditSink;
use taskgate_core::NoopAuditSink;
use tokio_stream::wrappers::ReceiverStream;

use crate::executor::ExecutionRequest;
use crate::executor::Executor;
use crate::registry::ToolRegistry;
use crate::skills;
use crate::state::EventRecord;
use crate::state::JobRecord;
use crate::state::JobState;
use crate::state::StateStore;
use crate::state::StateStoreError;
use crate::state::now_epoch;

/// Daemon version string returned by `Health`.
pub const DAEMON_VERSION: &str = "taskgate-toold-m1";

/// Poll interval `StreamJobEvents` uses while `follow=true`.
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ============================================================================
// SECTION: Error Taxonomy
// ============================================================================

/// The daemon's wire-level error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    /// The request was missing required fields or was otherwise malformed.
    InvalidRequest,
    /// The referenced job or tool does not exist.
    NotFound,
    /// An idempotency key was reused with a different request payload.
    IdempotencyKeyReused,
    /// An unclassified failure.
    Internal,
}

/// A daemon API error, serialized as the response body on non-2xx replies.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// The taxonomy code for this error.
    pub code: ApiErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Whether a client may retry the request unmodified.
    pub retryable: bool,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.code {
            ApiErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::IdempotencyKeyReused => StatusCode::CONFLICT,
            ApiErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        (status, Json(self)).into_response()
    }
}

impl From<StateStoreError> for ApiError {
    fn from(error: StateStoreError) -> Self {
        match error {
            StateStoreError::NotFound(job_id) => {
                Self { code: ApiErrorCode::NotFound, message: format!("job not found: {job_id}"), retryable: false }
            }
            StateStoreError::IdempotencyKeyReused => Self {
                code: ApiErrorCode::IdempotencyKeyReused,
                message: "idempotency key reused with a different request".to_string(),
                retryable: false,
            },
            StateStoreError::TerminalTransition(from, to) => Self {
                code: ApiErrorCode::InvalidRequest,
                message: format!("cannot transition terminal job from {from:?} to {to:?}"),
                retryable: false,
            },
            StateStoreError::LockPoisoned | StateStoreError::Backend(_) => {
                Self { code: ApiErrorCode::Internal, message: error.to_string(), retryable: true }
            }
        }
    }
}

// ============================================================================
// SECTION: Request/Response Bodies
// ============================================================================

/// Response body for `Health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Whether the daemon is healthy.
    pub ok: bool,
    /// Unix epoch seconds the response was generated at.
    pub ts: f64,
    /// The daemon's version string.
    pub daemon_version: String,
}

/// A single capability descriptor.
#[derive(Debug, Serialize)]
pub struct CapabilityDescriptor {
    /// The capability's name.
    pub name: String,
    /// The capability's version.
    pub version: String,
    /// Feature flags advertised for this capability.
    pub feature_flags: Vec<String>,
    /// Number of tools currently registered.
    pub tool_count: usize,
}

/// Response body for `ListCapabilities`.
#[derive(Debug, Serialize)]
pub struct ListCapabilitiesResponse {
    /// The server's own version string.
    pub server_version: String,
    /// API versions this daemon implements.
    pub api_versions: Vec<String>,
    /// Advertised capabilities.
    pub capabilities: Vec<CapabilityDescriptor>,
}

/// Query parameters accepted by `ListCapabilities`.
#[derive(Debug, Deserialize)]
pub struct CapabilitiesQuery {
    /// The profile the caller is operating under; currently informational.
    #[serde(default)]
    pub profile: Option<String>,
}

/// Request body for `SkillExecute`.
#[derive(Debug, Deserialize)]
pub struct SkillExecuteRequest {
    /// The skill (tool) to invoke.
    pub skill_id: String,
    /// The profile the caller is operating under.
    pub profile: String,
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
    /// The task payload.
    #[serde(default)]
    pub task_json: serde_json::Value,
    /// The constraints payload.
    #[serde(default)]
    pub constraints_json: serde_json::Value,
}

/// Response body for `SkillExecute`.
#[derive(Debug, Serialize)]
pub struct SkillExecuteResponse {
    /// `"submitted"` or `"replayed"`.
    pub status: String,
    /// The synthesized or replayed run id.
    pub run_id: String,
    /// The synthesized or replayed job id.
    pub job_id: String,
    /// The job's current state.
    pub state: JobState,
    /// Artifact paths produced so far.
    pub artifacts: Vec<String>,
}

/// Run provenance attached to `GetJobStatus`.
#[derive(Debug, Serialize)]
pub struct RunProvenance {
    /// Repository name the job ran against.
    pub repo: String,
    /// Commit SHA the job ran against, if known.
    pub commit_sha: String,
    /// Whether the working tree was dirty at submission time.
    pub dirty_flag: bool,
    /// JSON-encoded map of contract hashes.
    pub contract_hashes_json: String,
    /// JSON-encoded map of tool versions.
    pub tool_versions_json: String,
    /// Hash of the normalized request payload.
    pub input_hash: String,
    /// Opaque fingerprint of the execution environment.
    pub env_fingerprint: String,
}

/// Response body for `GetJobStatus`.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    /// The job record.
    #[serde(flatten)]
    pub job: JobRecord,
    /// Run provenance for this job.
    pub provenance: RunProvenance,
}

/// Request body for `CancelJob`.
#[derive(Debug, Deserialize)]
pub struct CancelJobRequest {
    /// Idempotency key for the cancellation itself; currently informational.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Query parameters accepted by `StreamJobEvents`.
#[derive(Debug, Deserialize)]
pub struct StreamEventsQuery {
    /// Only events with `seq` greater than this are returned.
    #[serde(default)]
    pub since_seq: u64,
    /// When true, poll until the job is terminal and no new events arrive.
    #[serde(default)]
    pub follow: bool,
}

// ============================================================================
// SECTION: Daemon
// ============================================================================

/// The tool daemon's shared state, cloned into every axum handler.
#[derive(Clone)]
pub struct ToolDaemon {
    store: Arc<dyn StateStore>,
    registry: Arc<ToolRegistry>,
    executor: Arc<dyn Executor>,
    working_directory: PathBuf,
    audit_sink: Arc<dyn AuditSink>,
}

impl ToolDaemon {
    /// Builds a daemon over the given store, registry, and executor. Audit
    /// events are discarded; use [`Self::with_audit_sink`] to record them.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, registry: ToolRegistry, executor: Arc<dyn Executor>, working_directory: PathBuf) -> Self {
        Self { store, registry: Arc::new(registry), executor, working_directory, audit_sink: Arc::new(NoopAuditSink) }
    }

    /// Replaces the audit sink used to record one event per job submission
    /// and terminal transition.
    #[must_use]
    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    /// Builds the axum [`Router`] exposing this daemon's wire API.
    #[must_use]
    pub fn router(self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/capabilities", get(list_capabilities))
            .route("/tools", get(list_tools))
            .route("/tools/{tool_id}", get(get_tool))
            .route("/skills/execute", post(skill_execute))
            .route("/jobs/{job_id}", get(get_job_status))
            .route("/jobs/{job_id}/cancel", post(cancel_job))
            .route("/jobs/{job_id}/events", get(stream_job_events))
            .with_state(Arc::new(self))
    }

    /// Binds and serves the router at `addr` until the process is killed.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn serve(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await
    }

    /// Binds and serves the router over a Unix-domain socket at `path`
    /// until the process is killed. An existing stale socket file at
    /// `path` is removed before binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket path cannot be bound.
    pub async fn serve_unix(self, path: &std::path::Path) -> std::io::Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = tokio::net::UnixListener::bind(path)?;
        axum::serve(listener, self.router()).await
    }
}

fn request_hash(skill_id: &str, profile: &str, task_json: &serde_json::Value, constraints_json: &serde_json::Value) -> String {
    let canonical = serde_json::json!({
        "skill_id": skill_id,
        "profile": profile,
        "task_json": task_json,
        "constraints_json": constraints_json,
    });
    taskgate_core::hash_canonical_json(&canonical).unwrap_or_default()
}

fn synthesize_id(prefix: &str) -> String {
    let nonce = taskgate_core::hash_canonical_json(&serde_json::json!({"prefix": prefix, "ts": now_epoch(), "salt": uuid_like_salt()}))
        .unwrap_or_default();
    format!("{prefix}-{}", &nonce[..12.min(nonce.len())])
}

fn uuid_like_salt() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;
    RandomState::new().hash_one(now_epoch().to_bits())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true, ts: now_epoch(), daemon_version: DAEMON_VERSION.to_string() })
}

async fn list_capabilities(
    State(daemon): State<Arc<ToolDaemon>>,
    Query(_query): Query<CapabilitiesQuery>,
) -> Json<ListCapabilitiesResponse> {
    Json(ListCapabilitiesResponse {
        server_version: DAEMON_VERSION.to_string(),
        api_versions: vec!["taskgate.toold.v1".to_string()],
        capabilities: vec![CapabilityDescriptor {
            name: "skill-execute".to_string(),
            version: "v1".to_string(),
            feature_flags: vec!["inmemory-or-sqlite".to_string(), "stream-events".to_string()],
            tool_count: daemon.registry.tool_count(),
        }],
    })
}

async fn list_tools(State(daemon): State<Arc<ToolDaemon>>) -> Json<Vec<crate::registry::ToolEntry>> {
    Json(daemon.registry.list())
}

async fn get_tool(State(daemon): State<Arc<ToolDaemon>>, AxumPath(tool_id): AxumPath<String>) -> Result<Json<crate::registry::ToolEntry>, ApiError> {
    daemon.registry.get(&tool_id).cloned().map(Json).ok_or_else(|| ApiError {
        code: ApiErrorCode::NotFound,
        message: format!("tool not found: {tool_id}"),
        retryable: false,
    })
}

async fn skill_execute(
    State(daemon): State<Arc<ToolDaemon>>,
    Json(request): Json<SkillExecuteRequest>,
) -> Result<Json<SkillExecuteResponse>, ApiError> {
    if request.skill_id.is_empty() || request.profile.is_empty() || request.idempotency_key.is_empty() {
        return Err(ApiError { code: ApiErrorCode::InvalidRequest, message: "missing required request fields".to_string(), retryable: false });
    }
    let Some(tool) = daemon.registry.get(&request.skill_id).cloned() else {
        return Err(ApiError { code: ApiErrorCode::NotFound, message: format!("unknown tool: {}", request.skill_id), retryable: false });
    };

    let job = JobRecord {
        job_id: synthesize_id("job"),
        run_id: synthesize_id("run"),
        state: JobState::Queued,
        skill_id: request.skill_id.clone(),
        profile: request.profile.clone(),
        idempotency_key: request.idempotency_key.clone(),
        request_hash: request_hash(&request.skill_id, &request.profile, &request.task_json, &request.constraints_json),
        artifacts: Vec::new(),
        events: Vec::new(),
        updated_at_epoch: now_epoch(),
    };
    let (stored, replay) = daemon.store.submit(job, "default")?;
    if !replay {
        daemon.store.append_event(&stored.job_id, "state_change", serde_json::json!({"from": "unspecified", "to": "queued"}))?;
        daemon.audit_sink.record(
            &AuditEvent::new("daemon", "job_submitted", serde_json::json!({"skill_id": stored.skill_id, "profile": stored.profile}))
                .with_run_id(stored.run_id.clone())
                .with_task_id(stored.job_id.clone()),
        );
        dispatch_job(&daemon, &stored, &tool, &request.task_json, &request.constraints_json);
    }
    let current = daemon.store.get(&stored.job_id)?;
    Ok(Json(SkillExecuteResponse {
        status: if replay { "replayed".to_string() } else { "submitted".to_string() },
        run_id: current.run_id,
        job_id: current.job_id,
        state: current.state,
        artifacts: current.artifacts,
    }))
}

fn dispatch_job(
    daemon: &Arc<ToolDaemon>,
    job: &JobRecord,
    tool: &crate::registry::ToolEntry,
    task_json: &serde_json::Value,
    constraints_json: &serde_json::Value,
) {
    if skills::is_builtin(&tool.tool_id) {
        let _ = skills::run_builtin_skill(daemon.store.as_ref(), &job.job_id, &tool.tool_id, task_json);
        return;
    }
    let daemon = Arc::clone(daemon);
    let job_id = job.job_id.clone();
    let run_id = job.run_id.clone();
    let tool = tool.clone();
    let task_json = task_json.clone();
    let constraints_json = constraints_json.clone();
    let working_directory = daemon.working_directory.clone();
    tokio::spawn(async move {
        let _ = daemon.store.transition(&job_id, JobState::Running);
        let request = ExecutionRequest {
            run_id,
            job_id: job_id.clone(),
            tool_id: tool.tool_id.clone(),
            profile: job.profile.clone(),
            task: task_json,
            constraints: constraints_json,
            entrypoint: tool.entrypoint.clone(),
            cwd: working_directory,
            timeout_seconds: 120,
            env_allowlist: tool.env_allowlist.clone(),
        };
        let store = Arc::clone(&daemon.store);
        let sink_job_id = job_id.clone();
        let sink = move |event: crate::executor::ExecutionEvent| {
            let _ = store.append_event(&sink_job_id, &event.kind, event.payload);
        };
        let request_run_id = request.run_id.clone();
        let outcome = daemon.executor.execute(request, &sink).await;
        let terminal_state = match outcome {
            Ok(result) if result.terminal_state == "succeeded" => {
                let _ = daemon.store.transition(&job_id, JobState::Succeeded);
                "succeeded"
            }
            Ok(result) => {
                let _ = daemon.store.append_event(&job_id, "error", serde_json::json!({"message": result.message, "exit_code": result.exit_code}));
                let _ = daemon.store.transition(&job_id, JobState::Failed);
                "failed"
            }
            Err(err) => {
                let _ = daemon.store.append_event(&job_id, "error", serde_json::json!({"message": err.to_string()}));
                let _ = daemon.store.transition(&job_id, JobState::Failed);
                "failed"
            }
        };
        daemon.audit_sink.record(
            &AuditEvent::new("daemon", "job_terminal", serde_json::json!({"terminal_state": terminal_state}))
                .with_run_id(request_run_id)
                .with_task_id(job_id.clone()),
        );
    });
}

async fn get_job_status(State(daemon): State<Arc<ToolDaemon>>, AxumPath(job_id): AxumPath<String>) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = daemon.store.get(&job_id)?;
    let provenance = RunProvenance {
        repo: "taskgate".to_string(),
        commit_sha: "unknown".to_string(),
        dirty_flag: false,
        contract_hashes_json: "{}".to_string(),
        tool_versions_json: "{}".to_string(),
        input_hash: job.request_hash.clone(),
        env_fingerprint: "local".to_string(),
    };
    Ok(Json(JobStatusResponse { job, provenance }))
}

async fn cancel_job(
    State(daemon): State<Arc<ToolDaemon>>,
    AxumPath(job_id): AxumPath<String>,
    Json(_request): Json<CancelJobRequest>,
) -> Result<Json<JobRecord>, ApiError> {
    let before = daemon.store.get(&job_id)?;
    let after = daemon.store.cancel(&job_id)?;
    if after.state != before.state {
        daemon.store.append_event(&job_id, "state_change", serde_json::json!({"from": format!("{:?}", before.state), "to": format!("{:?}", after.state)}))?;
    }
    Ok(Json(daemon.store.get(&job_id)?))
}

async fn stream_job_events(
    State(daemon): State<Arc<ToolDaemon>>,
    AxumPath(job_id): AxumPath<String>,
    Query(query): Query<StreamEventsQuery>,
) -> Result<Sse<ReceiverStream<Result<Event, Infallible>>>, ApiError> {
    daemon.store.get(&job_id)?;
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(16);
    tokio::spawn(async move {
        let mut since_seq = query.since_seq;
        loop {
            let Ok(events) = daemon.store.events_since(&job_id, since_seq) else { break };
            for event in &events {
                since_seq = event.seq;
                if tx.send(Ok(sse_event(event))).await.is_err() {
                    return;
                }
            }
            if !query.follow {
                return;
            }
            let Ok(job) = daemon.store.get(&job_id) else { break };
            if job.state.is_terminal() && events.is_empty() {
                return;
            }
            tokio::time::sleep(FOLLOW_POLL_INTERVAL).await;
        }
    });
    Ok(Sse::new(ReceiverStream::new(rx)))
}

fn sse_event(event: &EventRecord) -> Event {
    let payload = serde_json::json!({
        "seq": event.seq,
        "event_type": event.event_type,
        "payload": event.payload,
        "ts_epoch": event.ts_epoch,
    });
    Event::default().data(payload.to_string())
}
