// taskgate-toold/src/executor.rs
// ============================================================================
// Module: Tool Execution
// Description: The subprocess execution contract and its local-process
// implementation.
// Purpose: Run a tool's entrypoint as a child process, streaming log and
// progress events to a sink while enforcing a wall-clock timeout.
// Dependencies: tokio, async-trait, serde, serde_json
// ============================================================================

//! ## Overview
//! [`Executor`] is the only permitted subprocess call site owned by the tool
//! daemon; every other component reaches the outside world through it.
//! [`LocalProcessExecutor`] runs `request.entrypoint` directly, matching
//! `LocalProcessExecutor.execute`'s streaming and timeout behavior line for
//! line.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Command;

/// A request to execute one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The run this execution belongs to.
    pub run_id: String,
    /// The job this execution belongs to.
    pub job_id: String,
    /// The tool being invoked.
    pub tool_id: String,
    /// The profile the request was issued under.
    pub profile: String,
    /// The task payload, passed to the child as `TASKGATE_TASK_JSON`.
    pub task: serde_json::Value,
    /// The constraints payload, passed as `TASKGATE_CONSTRAINTS_JSON`.
    pub constraints: serde_json::Value,
    /// Argv to execute. An empty entrypoint fails immediately.
    pub entrypoint: Vec<String>,
    /// Working directory for the child process.
    pub cwd: PathBuf,
    /// Wall-clock budget in seconds before the child is killed.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// When set, only these environment variables are inherited.
    #[serde(default)]
    pub env_allowlist: Option<Vec<String>>,
}

const fn default_timeout_seconds() -> u64 {
    120
}

/// One event emitted while a tool executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Event kind: `log`, `progress`, or `error`.
    pub kind: String,
    /// Event payload.
    pub payload: serde_json::Value,
}

/// The terminal outcome of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `succeeded` or `failed`.
    pub terminal_state: String,
    /// Process exit code, or a sentinel (124 timeout, 127 empty entrypoint).
    pub exit_code: i32,
    /// Human-readable summary.
    pub message: String,
}

/// Errors raised while spawning or awaiting a tool's subprocess.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The child process could not be spawned.
    #[error("failed to spawn tool process: {0}")]
    Spawn(String),
    /// Reading the child's output streams failed.
    #[error("failed to read tool output: {0}")]
    Io(String),
}

/// Executes a tool invocation, emitting events to `sink` as they occur.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `request` to completion, calling `sink` for every log, progress,
    /// or error event observed along the way.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] only for failures to spawn or read the
    /// child process; a non-zero exit or timeout is reported through the
    /// returned [`ExecutionResult`], not as an error.
    async fn execute(
        &self,
        request: ExecutionRequest,
        sink: &(dyn Fn(ExecutionEvent) + Send + Sync),
    ) -> Result<ExecutionResult, ExecutorError>;
}

/// Runs a tool's entrypoint as a direct child process of the daemon.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProcessExecutor;

#[async_trait]
impl Executor for LocalProcessExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
        sink: &(dyn Fn(ExecutionEvent) + Send + Sync),
    ) -> Result<ExecutionResult, ExecutorError> {
        let Some((program, args)) = request.entrypoint.split_first() else {
            return Ok(ExecutionResult {
                terminal_state: "failed".to_string(),
                exit_code: 127,
                message: "empty entrypoint".to_string(),
            });
        };

        let mut command = Command::new(program);
        command.args(args).current_dir(&request.cwd).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(allowlist) = &request.env_allowlist {
            let allowlist: BTreeSet<&str> = allowlist.iter().map(String::as_str).collect();
            command.env_clear();
            for (key, value) in std::env::vars() {
                if allowlist.contains(key.as_str()) {
                    command.env(key, value);
                }
            }
        }
        command.env("TASKGATE_RUN_ID", &request.run_id);
        command.env("TASKGATE_JOB_ID", &request.job_id);
        command.env("TASKGATE_TOOL_ID", &request.tool_id);
        command.env("TASKGATE_PROFILE", &request.profile);
        command.env("TASKGATE_TASK_JSON", serde_json::to_string(&request.task).unwrap_or_default());
        command.env("TASKGATE_CONSTRAINTS_JSON", serde_json::to_string(&request.constraints).unwrap_or_default());

        let mut child = command.spawn().map_err(|err| ExecutorError::Spawn(err.to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| ExecutorError::Io("missing stdout handle".to_string()))?;
        let stderr = child.stderr.take().ok_or_else(|| ExecutorError::Io("missing stderr handle".to_string()))?;

        let timeout = std::time::Duration::from_secs(request.timeout_seconds);
        let drain = drain_streams(stdout, stderr, sink);
        let outcome = tokio::time::timeout(timeout, async {
            let exit_status = child.wait().await.map_err(|err| ExecutorError::Io(err.to_string()))?;
            Ok::<_, ExecutorError>(exit_status)
        });

        let (drain_result, wait_result) = tokio::join!(drain, outcome);
        drain_result?;
        match wait_result {
            Ok(Ok(status)) => {
                if status.success() {
                    Ok(ExecutionResult { terminal_state: "succeeded".to_string(), exit_code: 0, message: "ok".to_string() })
                } else {
                    let exit_code = status.code().unwrap_or(1);
                    Ok(ExecutionResult { terminal_state: "failed".to_string(), exit_code, message: "non-zero exit".to_string() })
                }
            }
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                sink(ExecutionEvent { kind: "error".to_string(), payload: serde_json::json!({"reason": "executor timeout"}) });
                Ok(ExecutionResult { terminal_state: "failed".to_string(), exit_code: 124, message: "executor timeout".to_string() })
            }
        }
    }
}

async fn drain_streams(
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    sink: &(dyn Fn(ExecutionEvent) + Send + Sync),
) -> Result<(), ExecutorError> {
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stdout_done = false;
    let mut stderr_done = false;
    while !stdout_done || !stderr_done {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => {
                match line.map_err(|err| ExecutorError::Io(err.to_string()))? {
                    Some(line) => emit_stdout_line(sink, &line),
                    None => stdout_done = true,
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line.map_err(|err| ExecutorError::Io(err.to_string()))? {
                    Some(line) => sink(ExecutionEvent { kind: "log".to_string(), payload: serde_json::json!({"stream": "stderr", "line": line}) }),
                    None => stderr_done = true,
                }
            }
        }
    }
    Ok(())
}

fn emit_stdout_line(sink: &(dyn Fn(ExecutionEvent) + Send + Sync), line: &str) {
    sink(ExecutionEvent { kind: "log".to_string(), payload: serde_json::json!({"stream": "stdout", "line": line}) });
    if let Some(raw) = line.strip_prefix("PROGRESS:") {
        if let Ok(value) = raw.trim().parse::<f64>() {
            sink(ExecutionEvent { kind: "progress".to_string(), payload: serde_json::json!({"value": value}) });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn request(entrypoint: Vec<&str>) -> ExecutionRequest {
        ExecutionRequest {
            run_id: "run-1".to_string(),
            job_id: "job-1".to_string(),
            tool_id: "echo".to_string(),
            profile: "default".to_string(),
            task: serde_json::json!({}),
            constraints: serde_json::json!({}),
            entrypoint: entrypoint.into_iter().map(str::to_string).collect(),
            cwd: std::env::temp_dir(),
            timeout_seconds: 5,
            env_allowlist: None,
        }
    }

    #[tokio::test]
    async fn an_empty_entrypoint_fails_immediately_without_spawning() {
        let executor = LocalProcessExecutor;
        let result = executor.execute(request(vec![]), &|_event| {}).await.unwrap();
        assert_eq!(result.exit_code, 127);
        assert_eq!(result.terminal_state, "failed");
    }

    #[tokio::test]
    async fn a_successful_command_streams_stdout_and_progress_lines() {
        let executor = LocalProcessExecutor;
        let events: Mutex<Vec<ExecutionEvent>> = Mutex::new(Vec::new());
        let sink = |event: ExecutionEvent| events.lock().unwrap().push(event);
        let result = executor
            .execute(request(vec!["bash", "-c", "echo hello; echo PROGRESS:0.5"]), &sink)
            .await
            .unwrap();
        assert_eq!(result.terminal_state, "succeeded");
        let events = events.into_inner().unwrap();
        assert!(events.iter().any(|event| event.kind == "progress"));
    }

    #[tokio::test]
    async fn a_nonzero_exit_is_reported_as_failed() {
        let executor = LocalProcessExecutor;
        let result = executor.execute(request(vec!["bash", "-c", "exit 3"]), &|_event| {}).await.unwrap();
        assert_eq!(result.terminal_state, "failed");
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn a_command_exceeding_its_timeout_is_killed() {
        let executor = LocalProcessExecutor;
        let mut req = request(vec!["bash", "-c", "sleep 5"]);
        req.timeout_seconds = 1;
        let result = executor.execute(req, &|_event| {}).await.unwrap();
        assert_eq!(result.exit_code, 124);
        assert_eq!(result.message, "executor timeout");
    }
}
