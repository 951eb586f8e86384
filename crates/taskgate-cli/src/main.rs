#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// taskgate-cli/src/main.rs
// ============================================================================
// Module: Taskgate CLI Entry Point
// Description: Command dispatcher for the tool daemon, the three run
// entry points, and the memory materializer/binder.
// Purpose: Give operators a single binary wiring every taskgate-* crate
// into runnable subcommands.
// Dependencies: clap, taskgate-core, taskgate-memory, taskgate-run,
// taskgate-toold, thiserror, tokio.
// ============================================================================

//! ## Overview
//! Every subcommand loads [`config::TaskgateConfig`], builds the library
//! types its crate expects, and prints a single JSON summary to stdout on
//! success. Diagnostics go to stderr; exit codes follow `0` success, `2`
//! policy/gate failure, other non-zero operational errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::ExitCode;

use clap::ArgAction;
use clap::Parser;
use clap::Subcommand;
use thiserror::Error;

mod commands;
mod config;

use commands::alertgate::AlertGateArgs;
use commands::alertgate::command_alert_gate;
use commands::daemon::ServeArgs;
use commands::daemon::command_serve;
use commands::dlq::DlqCommand;
use commands::dlq::command_dlq;
use commands::memory::MemoryCommand;
use commands::memory::command_memory;
use commands::run::RunCommand;
use commands::run::command_run;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "taskgate", disable_help_subcommand = true, disable_version_flag = true, arg_required_else_help = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the tool execution daemon.
    Serve(ServeArgs),
    /// Run entry points (demo, live-fix, plan-implement-verify).
    Run {
        /// Selected run subcommand.
        #[command(subcommand)]
        command: RunCommand,
    },
    /// Memory materializer, checkpoint health, and binder utilities.
    Memory {
        /// Selected memory subcommand.
        #[command(subcommand)]
        command: MemoryCommand,
    },
    /// Evaluates a finished run against fail-ratio/retry alert thresholds.
    AlertGate(AlertGateArgs),
    /// Dead-letter queue utilities.
    Dlq {
        /// Selected DLQ subcommand.
        #[command(subcommand)]
        command: DlqCommand,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying both a message and an exit code.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CliError {
    /// Human-readable error message.
    message: String,
    /// Exit code to return instead of the default failure code.
    exit_code: Option<u8>,
}

impl CliError {
    /// Constructs a new [`CliError`] with the default failure exit code.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), exit_code: None }
    }

    /// Constructs a [`CliError`] carrying an explicit exit code, for
    /// policy/gate failures that must surface as `2` rather than `1`.
    pub fn with_exit_code(message: impl Into<String>, exit_code: u8) -> Self {
        Self { message: message.into(), exit_code: Some(exit_code) }
    }
}

/// CLI result alias for fallible operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();

    if cli.show_version {
        write_stdout_line(&format!("taskgate {}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| CliError::new(format!("failed to write to stdout: {err}")))?;
        return Ok(ExitCode::SUCCESS);
    }

    match cli.command {
        Commands::Serve(args) => command_serve(args).await,
        Commands::Run { command } => command_run(command).await,
        Commands::Memory { command } => command_memory(command),
        Commands::AlertGate(args) => command_alert_gate(args),
        Commands::Dlq { command } => command_dlq(command),
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
pub(crate) fn write_stdout_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
pub(crate) fn write_stderr_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Prints a value as a single JSON line to stdout.
pub(crate) fn print_json(value: &impl serde::Serialize) -> CliResult<()> {
    let rendered = serde_json::to_string(value).map_err(|err| CliError::new(format!("failed to render JSON: {err}")))?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(format!("failed to write to stdout: {err}")))
}

/// Emits an error message to stderr and returns its exit code.
fn emit_error(err: &CliError) -> ExitCode {
    let _ = write_stderr_line(&err.message);
    match err.exit_code {
        Some(code) => ExitCode::from(code),
        None => ExitCode::FAILURE,
    }
}
