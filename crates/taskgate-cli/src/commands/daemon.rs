// taskgate-cli/src/commands/daemon.rs
// ============================================================================
// Module: Serve Command
// Description: Boots the tool execution daemon over a durable SQLite job
// store, a loaded tool registry, and the local process executor, bound to
// whichever endpoint `resolve_endpoint` picks.
// Purpose: Back `taskgate serve`.
// Dependencies: taskgate_toold
// ============================================================================

use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use taskgate_core::FileAuditSink;
use taskgate_toold::LocalProcessExecutor;
use taskgate_toold::SqliteStateConfig;
use taskgate_toold::SqliteStateStore;
use taskgate_toold::ToolDaemon;
use taskgate_toold::ToolRegistry;

use crate::CliError;
use crate::CliResult;
use crate::config::TaskgateConfig;
use crate::write_stderr_line;

/// Environment variable carrying an explicit daemon endpoint override, as
/// either `unix:<path>` or a `host:port` socket address.
const ENDPOINT_ENV_VAR: &str = "TASKGATE_TOOLD_ENDPOINT";
/// Environment variable naming the runtime directory a Unix-domain socket
/// is placed under when no explicit endpoint is configured.
const XDG_RUNTIME_DIR_ENV_VAR: &str = "XDG_RUNTIME_DIR";

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Optional config file path (defaults to `taskgate.toml` or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// The resolved transport the daemon should bind.
#[derive(Debug, Clone)]
enum Endpoint {
    /// A TCP socket address.
    Tcp(SocketAddr),
    /// A Unix-domain socket path.
    Unix(PathBuf),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => write!(formatter, "{addr}"),
            Self::Unix(path) => write!(formatter, "unix:{}", path.display()),
        }
    }
}

/// Resolves the daemon's endpoint: an explicit `TASKGATE_TOOLD_ENDPOINT`
/// override, else a Unix-domain socket under `$XDG_RUNTIME_DIR/taskgate`
/// when that directory exists, else the configured TCP bind address.
fn resolve_endpoint(configured_bind_addr: SocketAddr) -> Endpoint {
    if let Ok(value) = env::var(ENDPOINT_ENV_VAR) {
        if let Some(path) = value.strip_prefix("unix:") {
            return Endpoint::Unix(PathBuf::from(path));
        }
        if let Ok(addr) = value.parse::<SocketAddr>() {
            return Endpoint::Tcp(addr);
        }
    }
    if let Ok(runtime_dir) = env::var(XDG_RUNTIME_DIR_ENV_VAR) {
        let runtime_dir = Path::new(&runtime_dir);
        if runtime_dir.is_dir() {
            return Endpoint::Unix(runtime_dir.join("taskgate").join("toold.sock"));
        }
    }
    Endpoint::Tcp(configured_bind_addr)
}

/// Executes the `serve` command.
pub async fn command_serve(args: ServeArgs) -> CliResult<ExitCode> {
    let config = TaskgateConfig::load(args.config.as_deref()).map_err(|err| CliError::new(format!("config: {err}")))?;

    let registry = ToolRegistry::load(&config.daemon.registry_path)
        .map_err(|err| CliError::new(format!("failed to load tool registry: {err}")))?;
    let store = SqliteStateStore::new(SqliteStateConfig { path: config.daemon.state_db_path.clone(), busy_timeout_ms: 5000 })
        .map_err(|err| CliError::new(format!("failed to open job state store: {err}")))?;
    let audit_log_path = config.daemon.state_db_path.with_file_name("daemon-audit.jsonl");
    if let Some(parent) = audit_log_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| CliError::new(format!("failed to create audit log directory: {err}")))?;
    }
    let audit_sink = FileAuditSink::new(&audit_log_path).map_err(|err| CliError::new(format!("failed to open audit log: {err}")))?;
    let daemon = ToolDaemon::new(Arc::new(store), registry, Arc::new(LocalProcessExecutor), config.daemon.working_directory.clone())
        .with_audit_sink(Arc::new(audit_sink));

    let endpoint = resolve_endpoint(config.daemon.bind_addr);
    write_stderr_line(&format!("taskgate daemon listening on {endpoint}"))
        .map_err(|err| CliError::new(format!("failed to write to stderr: {err}")))?;

    match endpoint {
        Endpoint::Tcp(addr) => daemon.serve(addr).await.map_err(|err| CliError::new(format!("daemon failed: {err}")))?,
        Endpoint::Unix(path) => daemon.serve_unix(&path).await.map_err(|err| CliError::new(format!("daemon failed: {err}")))?,
    }
    Ok(ExitCode::SUCCESS)
}
