// taskgate-cli/src/commands/memory.rs
// ============================================================================
// Module: Memory Commands
// Description: Drives the materializer (once or on a poll loop), the
// checkpoint health probe, and the binder's derivation pass.
// Purpose: Back `taskgate memory materialize|checkpoint-health|bind`.
// Dependencies: taskgate_memory
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use clap::Subcommand;
use serde::Serialize;
use taskgate_core::FileAuditSink;
use taskgate_memory::BinderMode;
use taskgate_memory::FactStore;
use taskgate_memory::MaterializerConfig;
use taskgate_memory::derive_rows_from_task_rows;
use taskgate_memory::evaluate_checkpoint_health;
use taskgate_memory::run_loop;
use taskgate_memory::run_once_with_audit;

use crate::CliError;
use crate::CliResult;
use crate::config::TaskgateConfig;
use crate::print_json;

/// Exit code reserved for policy/gate and health-check failures.
const POLICY_EXIT_CODE: u8 = 2;

/// Memory subcommands.
#[derive(Subcommand, Debug)]
pub enum MemoryCommand {
    /// Folds pending run directories into the fact store.
    Materialize(MaterializeArgs),
    /// Checks whether the checkpoint has caught up on enough runs.
    CheckpointHealth(CheckpointHealthArgs),
    /// Derives binder artifacts from the fact store's task facts.
    Bind(BindArgs),
}

/// Config-path argument shared by every memory subcommand.
#[derive(Args, Debug)]
struct MemoryConfigArgs {
    /// Optional config file path (defaults to `taskgate.toml` or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for `memory materialize`.
#[derive(Args, Debug)]
pub struct MaterializeArgs {
    /// Shared config-path override.
    #[command(flatten)]
    shared: MemoryConfigArgs,
    /// Runs one materialization pass and exits instead of polling forever.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    once: bool,
}

/// Arguments for `memory checkpoint-health`.
#[derive(Args, Debug)]
pub struct CheckpointHealthArgs {
    /// Shared config-path override.
    #[command(flatten)]
    shared: MemoryConfigArgs,
    /// Overrides the configured minimum processed-run count.
    #[arg(long, value_name = "N")]
    min_processed_runs: Option<usize>,
}

/// Arguments for `memory bind`.
#[derive(Args, Debug)]
pub struct BindArgs {
    /// Shared config-path override.
    #[command(flatten)]
    shared: MemoryConfigArgs,
    /// Overrides the configured binder eligibility mode.
    #[arg(long, value_name = "strict|hybrid|lenient")]
    mode: Option<String>,
}

/// Dispatches memory subcommands.
pub fn command_memory(command: MemoryCommand) -> CliResult<ExitCode> {
    match command {
        MemoryCommand::Materialize(args) => command_materialize(args),
        MemoryCommand::CheckpointHealth(args) => command_checkpoint_health(args),
        MemoryCommand::Bind(args) => command_bind(args),
    }
}

/// Executes `memory materialize`.
fn command_materialize(args: MaterializeArgs) -> CliResult<ExitCode> {
    let config = TaskgateConfig::load(args.shared.config.as_deref()).map_err(|err| CliError::new(format!("config: {err}")))?;
    let store = FactStore::open(&config.memory.db_path).map_err(|err| CliError::new(format!("failed to open fact store: {err}")))?;
    let materializer_config =
        MaterializerConfig { run_root: config.memory.run_root.clone(), checkpoint_path: config.memory.checkpoint_path.clone() };
    let audit_log_path = config.memory.checkpoint_path.with_file_name("materializer-audit.jsonl");
    if let Some(parent) = audit_log_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| CliError::new(format!("failed to create audit log directory: {err}")))?;
    }
    let audit_sink = FileAuditSink::new(&audit_log_path).map_err(|err| CliError::new(format!("failed to open audit log: {err}")))?;

    if args.once {
        let processed = run_once_with_audit(&store, &materializer_config, &audit_sink)
            .map_err(|err| CliError::new(format!("materialize failed: {err}")))?;
        print_json(&serde_json::json!({ "processed_runs": processed }))?;
        return Ok(ExitCode::SUCCESS);
    }

    run_loop(&store, &materializer_config, Duration::from_secs(config.memory.poll_seconds), &audit_sink)
        .map_err(|err| CliError::new(format!("materialize loop failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `memory checkpoint-health`.
fn command_checkpoint_health(args: CheckpointHealthArgs) -> CliResult<ExitCode> {
    let config = TaskgateConfig::load(args.shared.config.as_deref()).map_err(|err| CliError::new(format!("config: {err}")))?;
    let min_processed_runs = args.min_processed_runs.unwrap_or(config.memory.min_processed_runs);
    let health = evaluate_checkpoint_health(&config.memory.checkpoint_path, min_processed_runs);
    let ok = health.ok;
    print_json(&health)?;
    if ok { Ok(ExitCode::SUCCESS) } else { Err(CliError::with_exit_code("checkpoint health check failed", POLICY_EXIT_CODE)) }
}

/// Summary printed after a binder pass.
#[derive(Debug, Serialize)]
struct BindReport {
    /// The eligibility mode the pass ran under.
    mode: String,
    /// Number of binder rows derived and upserted.
    derived_row_count: usize,
}

/// Executes `memory bind`.
fn command_bind(args: BindArgs) -> CliResult<ExitCode> {
    let config = TaskgateConfig::load(args.shared.config.as_deref()).map_err(|err| CliError::new(format!("config: {err}")))?;
    let mode_label = args.mode.unwrap_or(config.memory.binder_mode);
    let mode = BinderMode::parse(&mode_label).ok_or_else(|| CliError::new(format!("invalid binder mode: {mode_label}")))?;

    let store = FactStore::open(&config.memory.db_path).map_err(|err| CliError::new(format!("failed to open fact store: {err}")))?;
    let task_facts = store.all_task_facts().map_err(|err| CliError::new(format!("failed to read task facts: {err}")))?;
    let rows = derive_rows_from_task_rows(&task_facts, mode);
    for row in &rows {
        store.upsert_binder_fact(row).map_err(|err| CliError::new(format!("failed to upsert binder fact: {err}")))?;
    }

    print_json(&BindReport { mode: mode_label, derived_row_count: rows.len() })?;
    Ok(ExitCode::SUCCESS)
}
