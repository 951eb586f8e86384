// taskgate-cli/src/commands/run.rs
// ============================================================================
// Module: Run Commands
// Description: Drives the three run entry points: the reference demo, the
// self-healing retry demo, and the plan/implement/verify pipeline that
// shells real commands and books a milestone/issue with a collaborator.
// Purpose: Back `taskgate run demo|live-fix|piv`.
// Dependencies: taskgate_core, taskgate_run
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Subcommand;
use serde::Serialize;
use taskgate_core::PreContract;
use taskgate_run::NoopCollaborator;
use taskgate_run::PlanImplementVerifyConfig;
use taskgate_run::RunConfig;
use taskgate_run::RunOutcome;
use taskgate_run::default_demo_worker;
use taskgate_run::run_demo;
use taskgate_run::run_live_fix;
use taskgate_run::run_plan_implement_verify;

use super::read_json;
use crate::CliError;
use crate::CliResult;
use crate::config::TaskgateConfig;
use crate::print_json;

/// Run subcommands.
#[derive(Subcommand, Debug)]
pub enum RunCommand {
    /// Runs the reference plan/implement/verify demo against a synthetic worker.
    Demo(RunDemoArgs),
    /// Runs the fixed demo whose implement task fails once, then heals.
    LiveFix(RunLiveFixArgs),
    /// Runs implement/verify via real shell commands and books a milestone/issue.
    Piv(RunPivArgs),
}

/// Arguments shared by every run subcommand.
#[derive(Args, Debug)]
struct RunConfigArgs {
    /// Optional config file path (defaults to `taskgate.toml` or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Overrides the configured run root.
    #[arg(long, value_name = "DIR")]
    run_root: Option<PathBuf>,
}

/// Arguments for `run demo`.
#[derive(Args, Debug)]
pub struct RunDemoArgs {
    /// Shared run-config overrides.
    #[command(flatten)]
    shared: RunConfigArgs,
    /// Path to the pre-contract JSON file.
    #[arg(long, value_name = "PATH")]
    contract: PathBuf,
}

/// Arguments for `run live-fix`.
#[derive(Args, Debug)]
pub struct RunLiveFixArgs {
    /// Shared run-config overrides.
    #[command(flatten)]
    shared: RunConfigArgs,
}

/// Arguments for `run piv`.
#[derive(Args, Debug)]
pub struct RunPivArgs {
    /// Shared run-config overrides.
    #[command(flatten)]
    shared: RunConfigArgs,
    /// Path to the pre-contract JSON file.
    #[arg(long, value_name = "PATH")]
    contract: PathBuf,
    /// Repository slug the collaborator books a milestone and issue in.
    #[arg(long)]
    repo: String,
    /// Title for the booked milestone.
    #[arg(long, value_name = "TITLE")]
    milestone_title: String,
    /// Title for the created issue.
    #[arg(long, value_name = "TITLE")]
    issue_title: String,
    /// Body text for the created issue.
    #[arg(long, value_name = "TEXT")]
    issue_body: String,
    /// A command run for the implement task; may be repeated to run a
    /// sequence, stopping at the first non-zero exit.
    #[arg(long = "implement", value_name = "COMMAND")]
    implement_commands: Vec<String>,
    /// The single command run for the verify task.
    #[arg(long, value_name = "COMMAND")]
    verify: String,
    /// Working directory commands execute from.
    #[arg(long, value_name = "DIR")]
    working_dir: Option<PathBuf>,
}

/// Dispatches run subcommands.
pub async fn command_run(command: RunCommand) -> CliResult<ExitCode> {
    match command {
        RunCommand::Demo(args) => command_run_demo(args).await,
        RunCommand::LiveFix(args) => command_run_live_fix(args).await,
        RunCommand::Piv(args) => command_run_piv(args).await,
    }
}

/// Resolves a [`RunConfig`] from configuration plus CLI overrides.
fn resolve_run_config(shared: &RunConfigArgs) -> CliResult<RunConfig> {
    let config = TaskgateConfig::load(shared.config.as_deref()).map_err(|err| CliError::new(format!("config: {err}")))?;
    Ok(RunConfig {
        run_root: shared.run_root.clone().unwrap_or(config.run.run_root),
        worker_models: config.run.worker_models,
        risk_threshold: config.run.risk_threshold,
    })
}

/// A condensed, stable JSON summary printed after every run command.
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    /// The run's identifier.
    run_id: &'a str,
    /// Number of tasks the dispatcher handed to workers.
    dispatched_count: usize,
    /// The wave's gate verdict.
    gate_status: String,
    /// The wave's substrate verdict.
    substrate_status: String,
    /// The final promotion decision.
    promotion_decision: String,
}

impl<'a> RunReport<'a> {
    fn from_outcome(outcome: &'a RunOutcome) -> CliResult<Self> {
        Ok(Self {
            run_id: outcome.summary.run_id.as_str(),
            dispatched_count: outcome.summary.dispatched_count,
            gate_status: status_label(&outcome.gate_decision.status)?,
            substrate_status: status_label(&outcome.gate_decision.substrate_status)?,
            promotion_decision: status_label(&outcome.promotion_decision.decision)?,
        })
    }
}

/// Serializes an enum through its own `serde` rename to a plain string.
fn status_label(value: &impl Serialize) -> CliResult<String> {
    match serde_json::to_value(value).map_err(|err| CliError::new(format!("failed to render status: {err}")))? {
        serde_json::Value::String(label) => Ok(label),
        other => Ok(other.to_string()),
    }
}

/// Executes `run demo`.
async fn command_run_demo(args: RunDemoArgs) -> CliResult<ExitCode> {
    let run_config = resolve_run_config(&args.shared)?;
    let contract: PreContract = read_json("contract", &args.contract)?;
    let outcome = run_demo(&contract, default_demo_worker(), run_config)
        .await
        .map_err(|err| CliError::new(format!("run demo failed: {err}")))?;
    print_json(&RunReport::from_outcome(&outcome)?)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `run live-fix`.
async fn command_run_live_fix(args: RunLiveFixArgs) -> CliResult<ExitCode> {
    let run_config = resolve_run_config(&args.shared)?;
    let (outcome, iteration_loop) =
        run_live_fix(run_config).await.map_err(|err| CliError::new(format!("run live-fix failed: {err}")))?;
    let report = RunReport::from_outcome(&outcome)?;
    print_json(&serde_json::json!({
        "run_id": report.run_id,
        "dispatched_count": report.dispatched_count,
        "gate_status": report.gate_status,
        "substrate_status": report.substrate_status,
        "promotion_decision": report.promotion_decision,
        "iteration_stage_count": iteration_loop.entries.len(),
    }))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `run piv`.
async fn command_run_piv(args: RunPivArgs) -> CliResult<ExitCode> {
    let run_config = resolve_run_config(&args.shared)?;
    let contract: PreContract = read_json("contract", &args.contract)?;
    if args.implement_commands.is_empty() {
        return Err(CliError::new("at least one --implement command is required"));
    }
    let piv_config = PlanImplementVerifyConfig {
        repo: args.repo,
        milestone_title: args.milestone_title,
        issue_title: args.issue_title,
        issue_body: args.issue_body,
        implement_commands: args.implement_commands,
        verify_command: args.verify,
        working_directory: args.working_dir,
    };
    let outcome = run_plan_implement_verify(&contract, Arc::new(NoopCollaborator), piv_config, run_config)
        .await
        .map_err(|err| CliError::new(format!("run piv failed: {err}")))?;
    print_json(&RunReport::from_outcome(&outcome)?)?;
    Ok(ExitCode::SUCCESS)
}
