// taskgate-cli/src/commands/dlq.rs
// ============================================================================
// Module: DLQ Reprocess Command
// Description: Lists a run's dead-letter records as a manual-review
// worklist. Never auto-retries a dead-lettered task.
// Purpose: Back `taskgate dlq reprocess`.
// Dependencies: taskgate_pipeline::harness::dlq
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Subcommand;
use taskgate_pipeline::dlq::list_dlq_entries;

use crate::CliError;
use crate::CliResult;
use crate::print_json;

/// DLQ subcommands.
#[derive(Subcommand, Debug)]
pub enum DlqCommand {
    /// Lists a run's dead-letter records as a manual-review worklist.
    Reprocess(ReprocessArgs),
}

/// Arguments for `dlq reprocess`.
#[derive(Args, Debug)]
pub struct ReprocessArgs {
    /// Root directory containing one subdirectory per run.
    #[arg(long, value_name = "DIR")]
    run_root: PathBuf,
    /// The run to list dead-letter records for.
    #[arg(long, value_name = "RUN_ID")]
    run_id: String,
}

/// Dispatches DLQ subcommands.
pub fn command_dlq(command: DlqCommand) -> CliResult<ExitCode> {
    match command {
        DlqCommand::Reprocess(args) => command_reprocess(args),
    }
}

/// Executes `dlq reprocess`.
fn command_reprocess(args: ReprocessArgs) -> CliResult<ExitCode> {
    let worklist = list_dlq_entries(&args.run_root, &args.run_id)
        .map_err(|err| CliError::new(format!("failed to list dead-letter records: {err}")))?;
    print_json(&worklist)?;
    Ok(ExitCode::SUCCESS)
}
