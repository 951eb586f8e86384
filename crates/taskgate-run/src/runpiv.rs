// taskgate-run/src/runpiv.rs
// ============================================================================
// Module: Taskgate Run Plan/Implement/Verify
// Description: Runs a non-demo plan -> implement -> verify loop backed by
// real shell commands and a stubbed external collaborator for
// milestone/issue bookkeeping.
// Purpose: The production entry point `RunDemo` stands in for; every
// implement/verify command it shells out to is real and its stdout/stderr
// is kept verbatim.
// Dependencies: taskgate-core, taskgate-pipeline
// ============================================================================

//! ## Overview
//! The plan task books a milestone and an issue through an
//! [`ExternalCollaborator`]; the implement task runs a list of shell
//! commands in order, stopping at the first non-zero exit; the verify task
//! runs a single shell command. Every command's combined stdout/stderr is
//! written to a log file under the run directory, matching the original
//! orchestrator's `implement/command_NN.log` and `verify/verify.log`
//! layout. The worker closure runs inside the harness's
//! `spawn_blocking` pool, so every call here is synchronous.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use taskgate_core::AttemptStatus;
use taskgate_core::PreContract;
use taskgate_core::atomic_write_json;
use taskgate_core::atomic_write_text;
use taskgate_core::reason_code::EXEC_NONZERO_EXIT;
use taskgate_core::reason_code::VERIFY_TEST_FAILURE;
use taskgate_pipeline::RawOutcome;
use taskgate_pipeline::RawWorkerFn;

use crate::rundemo::RunConfig;
use crate::rundemo::RunError;
use crate::rundemo::RunOutcome;
use crate::rundemo::run_demo;

// ============================================================================
// SECTION: External Collaborator
// ============================================================================

/// A milestone booked (or, in dry-run, synthesized) against a code-hosting
/// repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneRecord {
    /// The milestone's number within its repository.
    pub number: u64,
    /// The milestone's title.
    pub title: String,
    /// A browsable URL for the milestone.
    pub html_url: String,
    /// Whether this call created the milestone or found an existing one.
    pub created: bool,
}

/// An issue booked (or, in dry-run, synthesized) against a code-hosting
/// repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    /// The issue's number within its repository.
    pub number: u64,
    /// A browsable URL for the issue.
    pub html_url: String,
}

/// Errors raised booking a milestone or issue with an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator's backing call failed.
    #[error("collaborator call failed: {0}")]
    Failed(String),
}

/// Books a milestone and an issue for a plan-implement-verify run.
///
/// Kept behind a trait so a run can be exercised without reaching a real
/// code-hosting service; no client for an actual code-hosting API is wired
/// in, so the only implementation shipped here is a stub.
pub trait ExternalCollaborator: Send + Sync {
    /// Finds or creates a milestone titled `title` in `repo`.
    fn ensure_milestone(&self, repo: &str, title: &str) -> Result<MilestoneRecord, CollaboratorError>;

    /// Creates an issue titled `title` in `repo`, filed under `milestone_number`.
    fn create_issue(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        milestone_number: u64,
    ) -> Result<IssueRecord, CollaboratorError>;
}

/// A collaborator that books nothing and returns synthetic dry-run records,
/// mirroring the original orchestrator's `--dry-run-plan` branch.
#[derive(Debug, Clone, Default)]
pub struct NoopCollaborator;

impl ExternalCollaborator for NoopCollaborator {
    fn ensure_milestone(&self, repo: &str, title: &str) -> Result<MilestoneRecord, CollaboratorError> {
        Ok(MilestoneRecord {
            number: 0,
            title: title.to_string(),
            html_url: format!("https://example.invalid/{repo}/milestone/dry-run"),
            created: false,
        })
    }

    fn create_issue(&self, repo: &str, title: &str, _body: &str, _milestone_number: u64) -> Result<IssueRecord, CollaboratorError> {
        Ok(IssueRecord {
            number: 0,
            html_url: format!("https://example.invalid/{repo}/issues/dry-run?title={title}"),
        })
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// The real commands and collaborator inputs a plan-implement-verify run
/// needs beyond the shared [`RunConfig`].
pub struct PlanImplementVerifyConfig {
    /// Repository slug the collaborator books a milestone and issue in.
    pub repo: String,
    /// Title for the booked milestone.
    pub milestone_title: String,
    /// Title for the created issue.
    pub issue_title: String,
    /// Body text for the created issue.
    pub issue_body: String,
    /// Commands run in order for the implement task; the first non-zero
    /// exit stops the sequence.
    pub implement_commands: Vec<String>,
    /// The single command run for the verify task.
    pub verify_command: String,
    /// Working directory commands execute from; `None` inherits the
    /// current process's.
    pub working_directory: Option<PathBuf>,
}

// ============================================================================
// SECTION: Shell Execution
// ============================================================================

/// Runs `command` under `bash -lc`, persists its combined stdout/stderr to
/// `log_path`, and returns whether it exited zero.
fn run_shell_command(command: &str, cwd: Option<&Path>, log_path: &Path) -> bool {
    let mut builder = Command::new("bash");
    builder.args(["-lc", command]);
    if let Some(dir) = cwd {
        builder.current_dir(dir);
    }
    let (success, combined) = match builder.output() {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let joined: Vec<&str> = [stdout.trim(), stderr.trim()].into_iter().filter(|s| !s.is_empty()).collect();
            (output.status.success(), joined.join("\n"))
        }
        Err(error) => (false, format!("failed to spawn command: {error}")),
    };
    let text = format!("$ {command}\n\n{combined}\n");
    let _ = atomic_write_text(log_path, &text);
    success
}

#[allow(clippy::cast_possible_truncation, reason = "shell commands never run long enough to overflow u64 millis")]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Builds the worker a plan-implement-verify run dispatches: the plan task
/// books a milestone and issue through `collaborator`; the implement task
/// runs `config.implement_commands` in order; the verify task runs
/// `config.verify_command`. All three persist their output under
/// `run_dir`.
#[must_use]
pub fn shell_worker(collaborator: Arc<dyn ExternalCollaborator>, config: Arc<PlanImplementVerifyConfig>, run_dir: PathBuf) -> RawWorkerFn {
    Arc::new(move |task| {
        let task_id = task.task_id.to_string();
        let worker_model = task.worker_model.clone().unwrap_or_else(|| "unknown".to_string());
        if task_id.ends_with("-plan") {
            run_plan_stage(collaborator.as_ref(), &config, &run_dir, &worker_model)
        } else if task_id.ends_with("-implement") {
            run_implement_stage(&config, &run_dir, &worker_model)
        } else {
            run_verify_stage(&config, &run_dir, &worker_model)
        }
    })
}

fn run_plan_stage(
    collaborator: &dyn ExternalCollaborator,
    config: &PlanImplementVerifyConfig,
    run_dir: &Path,
    worker_model: &str,
) -> RawOutcome {
    let started = Instant::now();
    match book_milestone_and_issue(collaborator, config) {
        Ok((milestone, issue)) => {
            let plan_output = serde_json::json!({
                "repo": config.repo,
                "milestone": milestone,
                "issue": issue,
            });
            let _ = atomic_write_json(&run_dir.join("plan").join("plan.output.json"), &plan_output);
            RawOutcome {
                status: AttemptStatus::Pass,
                reason_code: None,
                notes: Some(format!("plan recorded issue={} milestone={}", issue.html_url, milestone.html_url)),
                worker_model: worker_model.to_string(),
                duration_ms: elapsed_ms(started),
                transient: false,
            }
        }
        Err(error) => RawOutcome {
            status: AttemptStatus::Fail,
            reason_code: Some(EXEC_NONZERO_EXIT.to_string()),
            notes: Some(error.to_string()),
            worker_model: worker_model.to_string(),
            duration_ms: elapsed_ms(started),
            transient: false,
        },
    }
}

fn book_milestone_and_issue(
    collaborator: &dyn ExternalCollaborator,
    config: &PlanImplementVerifyConfig,
) -> Result<(MilestoneRecord, IssueRecord), CollaboratorError> {
    let milestone = collaborator.ensure_milestone(&config.repo, &config.milestone_title)?;
    let issue = collaborator.create_issue(&config.repo, &config.issue_title, &config.issue_body, milestone.number)?;
    Ok((milestone, issue))
}

fn run_implement_stage(config: &PlanImplementVerifyConfig, run_dir: &Path, worker_model: &str) -> RawOutcome {
    let started = Instant::now();
    if config.implement_commands.is_empty() {
        return RawOutcome {
            status: AttemptStatus::Pass,
            reason_code: None,
            notes: Some("no implement commands provided (no-op)".to_string()),
            worker_model: worker_model.to_string(),
            duration_ms: elapsed_ms(started),
            transient: false,
        };
    }
    let implement_dir = run_dir.join("implement");
    for (index, command) in config.implement_commands.iter().enumerate() {
        let log_path = implement_dir.join(format!("command_{:02}.log", index + 1));
        let success = run_shell_command(command, config.working_directory.as_deref(), &log_path);
        if !success {
            return RawOutcome {
                status: AttemptStatus::Fail,
                reason_code: Some(EXEC_NONZERO_EXIT.to_string()),
                notes: Some(format!("implement command failed at #{}", index + 1)),
                worker_model: worker_model.to_string(),
                duration_ms: elapsed_ms(started),
                transient: false,
            };
        }
    }
    RawOutcome {
        status: AttemptStatus::Pass,
        reason_code: None,
        notes: Some(format!("implement commands passed ({})", config.implement_commands.len())),
        worker_model: worker_model.to_string(),
        duration_ms: elapsed_ms(started),
        transient: false,
    }
}

fn run_verify_stage(config: &PlanImplementVerifyConfig, run_dir: &Path, worker_model: &str) -> RawOutcome {
    let started = Instant::now();
    let log_path = run_dir.join("verify").join("verify.log");
    let success = run_shell_command(&config.verify_command, config.working_directory.as_deref(), &log_path);
    if success {
        RawOutcome {
            status: AttemptStatus::Pass,
            reason_code: None,
            notes: Some("verify command passed".to_string()),
            worker_model: worker_model.to_string(),
            duration_ms: elapsed_ms(started),
            transient: false,
        }
    } else {
        RawOutcome {
            status: AttemptStatus::Fail,
            reason_code: Some(VERIFY_TEST_FAILURE.to_string()),
            notes: Some("verify command failed".to_string()),
            worker_model: worker_model.to_string(),
            duration_ms: elapsed_ms(started),
            transient: false,
        }
    }
}

// ============================================================================
// SECTION: Run Plan/Implement/Verify
// ============================================================================

/// Runs a plan-implement-verify loop backed by real shell commands and an
/// external collaborator (`spec` §4.11, `RunPlanImplementVerify`).
///
/// # Errors
///
/// Returns [`RunError`] if any pipeline stage fails.
pub async fn run_plan_implement_verify(
    contract: &PreContract,
    collaborator: Arc<dyn ExternalCollaborator>,
    piv_config: PlanImplementVerifyConfig,
    run_config: RunConfig,
) -> Result<RunOutcome, RunError> {
    let run_dir = run_config.run_root.join(&contract.packet_id);
    let piv_config = Arc::new(piv_config);
    let worker = shell_worker(collaborator, Arc::clone(&piv_config), run_dir);
    run_demo(contract, worker, run_config).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use taskgate_core::Budgets;
    use taskgate_core::PlanCard;
    use taskgate_core::PreContractActions;
    use tempfile::tempdir;

    use super::*;

    fn contract() -> PreContract {
        PreContract {
            packet_id: "pkt-plan-implement-verify-test".to_string(),
            base_ref: "main".to_string(),
            budgets: Budgets {
                iteration_budget: 1,
                time_minutes: None,
            },
            actions: PreContractActions { test: None },
            plan_card: PlanCard {
                why: "ship the change".to_string(),
                what: "exercise the real-command path".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn a_plan_implement_verify_run_executes_real_shell_commands() {
        let dir = tempdir().unwrap();
        let piv_config = PlanImplementVerifyConfig {
            repo: "octo/example".to_string(),
            milestone_title: "M1".to_string(),
            issue_title: "Do the thing".to_string(),
            issue_body: "body".to_string(),
            implement_commands: vec!["true".to_string()],
            verify_command: "true".to_string(),
            working_directory: None,
        };
        let run_config = RunConfig {
            run_root: dir.path().to_path_buf(),
            worker_models: vec!["model-a".to_string()],
            risk_threshold: 60,
        };
        let outcome = run_plan_implement_verify(&contract(), Arc::new(NoopCollaborator), piv_config, run_config)
            .await
            .unwrap();

        for entry in &outcome.summary.results {
            assert_eq!(entry.result.status, AttemptStatus::Pass);
        }
        let plan_output = dir
            .path()
            .join("pkt-plan-implement-verify-test")
            .join("plan")
            .join("plan.output.json");
        assert!(plan_output.exists());
        let verify_log = dir
            .path()
            .join("pkt-plan-implement-verify-test")
            .join("verify")
            .join("verify.log");
        assert!(verify_log.exists());
    }

    #[tokio::test]
    async fn a_failing_verify_command_fails_the_verify_task() {
        let dir = tempdir().unwrap();
        let piv_config = PlanImplementVerifyConfig {
            repo: "octo/example".to_string(),
            milestone_title: "M1".to_string(),
            issue_title: "Do the thing".to_string(),
            issue_body: "body".to_string(),
            implement_commands: vec!["true".to_string()],
            verify_command: "false".to_string(),
            working_directory: None,
        };
        let run_config = RunConfig {
            run_root: dir.path().to_path_buf(),
            worker_models: vec!["model-a".to_string()],
            risk_threshold: 60,
        };
        let outcome = run_plan_implement_verify(&contract(), Arc::new(NoopCollaborator), piv_config, run_config)
            .await
            .unwrap();

        let verify = outcome
            .summary
            .results
            .iter()
            .find(|entry| entry.result.task_id.as_str().ends_with("-verify"))
            .unwrap();
        assert_eq!(verify.result.status, AttemptStatus::Fail);
        assert_eq!(verify.result.reason_code.as_deref(), Some(VERIFY_TEST_FAILURE));
    }
}
