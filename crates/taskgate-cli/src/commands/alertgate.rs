// taskgate-cli/src/commands/alertgate.rs
// ============================================================================
// Module: Alert Gate Command
// Description: Evaluates a finished run's summary against fail-ratio and
// total-retry thresholds, exiting non-zero when either is exceeded.
// Purpose: Back `taskgate alert-gate`, a drill/deploy precondition check.
// Dependencies: taskgate_pipeline::checker::alert
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use taskgate_pipeline::RunSummary;
use taskgate_pipeline::alert::AlertThresholds;
use taskgate_pipeline::alert::evaluate;

use super::read_json;
use crate::CliError;
use crate::CliResult;
use crate::print_json;

/// Exit code reserved for policy/gate and health-check failures.
const POLICY_EXIT_CODE: u8 = 2;

/// Arguments for the `alert-gate` command.
#[derive(Args, Debug)]
pub struct AlertGateArgs {
    /// Path to the run's `summary.json`.
    #[arg(long, value_name = "PATH")]
    summary: PathBuf,
    /// Maximum tolerated ratio of failed tasks to total tasks.
    #[arg(long, value_name = "RATIO", default_value_t = AlertThresholds::default().max_fail_ratio)]
    max_fail_ratio: f64,
    /// Maximum tolerated total retry count across all tasks.
    #[arg(long, value_name = "N", default_value_t = AlertThresholds::default().max_total_retries)]
    max_total_retries: u32,
}

/// Executes the `alert-gate` command.
pub fn command_alert_gate(args: AlertGateArgs) -> CliResult<ExitCode> {
    let summary: RunSummary = read_json("summary", &args.summary)?;
    let thresholds = AlertThresholds { max_fail_ratio: args.max_fail_ratio, max_total_retries: args.max_total_retries };
    let report = evaluate(&summary, thresholds);
    let ok = report.ok;
    print_json(&report)?;
    if ok { Ok(ExitCode::SUCCESS) } else { Err(CliError::with_exit_code("alert gate thresholds exceeded", POLICY_EXIT_CODE)) }
}
