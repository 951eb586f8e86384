// taskgate-cli/src/config.rs
// ============================================================================
// Module: Taskgate CLI Configuration
// Description: Loads the optional TOML configuration file backing CLI
// defaults (run root, daemon bind address, memory database paths).
// Purpose: Let operators pin per-environment defaults once instead of
// repeating flags on every invocation.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file resolved from an explicit
//! `--config` path, the `TASKGATE_CONFIG` environment variable, or the
//! `taskgate.toml` default in the current directory. A missing file at the
//! default location is not an error: every section falls back to its own
//! defaults. An explicit path (flag or env) that is missing is an error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "taskgate.toml";
/// Environment variable used to override the config path.
const CONFIG_ENV_VAR: &str = "TASKGATE_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Top-level Taskgate CLI configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskgateConfig {
    /// Run-loop defaults (`run-demo`/`run-live-fix`/`run-piv`).
    #[serde(default)]
    pub run: RunSection,
    /// Tool daemon defaults (`toold serve`).
    #[serde(default)]
    pub daemon: DaemonSection,
    /// Memory materializer/binder defaults.
    #[serde(default)]
    pub memory: MemorySection,
}

/// Defaults shared by every `run-*` subcommand.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Root directory every run's artifacts are persisted under.
    pub run_root: PathBuf,
    /// Worker models the dispatcher round-robins across unassigned tasks.
    pub worker_models: Vec<String>,
    /// Risk-score threshold above which an approved gate escalates.
    pub risk_threshold: i64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            run_root: PathBuf::from("runs"),
            worker_models: vec!["taskgate-worker-a".to_string()],
            risk_threshold: 60,
        }
    }
}

/// Defaults for the tool execution daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Address the daemon binds its HTTP/SSE API to.
    pub bind_addr: SocketAddr,
    /// Tool manifest directory or registry file.
    pub registry_path: PathBuf,
    /// `SQLite` database backing job state.
    pub state_db_path: PathBuf,
    /// Working directory subprocess tools execute from.
    pub working_directory: PathBuf,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            registry_path: PathBuf::from("tools"),
            state_db_path: PathBuf::from("toold/state.sqlite3"),
            working_directory: PathBuf::from("."),
        }
    }
}

/// Defaults for the memory materializer, binder, and checkpoint health check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Root directory containing one subdirectory per run.
    pub run_root: PathBuf,
    /// Path to the checkpoint file tracking processed run ids.
    pub checkpoint_path: PathBuf,
    /// `SQLite` database backing the materialized fact store.
    pub db_path: PathBuf,
    /// Poll interval in seconds for the long-running materializer loop.
    pub poll_seconds: u64,
    /// Minimum processed-run count the checkpoint health check requires.
    pub min_processed_runs: usize,
    /// Default binder eligibility mode (`strict`, `hybrid`, or `lenient`).
    pub binder_mode: String,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            run_root: PathBuf::from("runs"),
            checkpoint_path: PathBuf::from("memory/checkpoint.json"),
            db_path: PathBuf::from("memory/facts.sqlite3"),
            poll_seconds: 5,
            min_processed_runs: 1,
            binder_mode: "strict".to_string(),
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// The resolved configuration file exceeded the size limit.
    #[error("config file exceeds size limit")]
    TooLarge,
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl TaskgateConfig {
    /// Loads configuration from `path`, the `TASKGATE_CONFIG` environment
    /// variable, or the default filename, in that order. Returns defaults
    /// unchanged when no explicit path was given and the default filename
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an explicitly named path is missing,
    /// too large, unreadable, or fails to parse as TOML.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (resolved, explicit) = resolve_path(path);
        if !resolved.exists() {
            if explicit {
                return Err(ConfigError::Io(format!("{} not found", resolved.display())));
            }
            return Ok(Self::default());
        }
        let metadata = fs::metadata(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge);
        }
        let content = fs::read_to_string(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        toml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
    }
}

/// Resolves the config path from CLI or environment defaults, returning
/// whether the path was given explicitly (flag or env) rather than
/// defaulted, since only explicit paths are required to exist.
fn resolve_path(path: Option<&Path>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path.to_path_buf(), true);
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        return (PathBuf::from(env_path), true);
    }
    (PathBuf::from(DEFAULT_CONFIG_NAME), false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;

    #[test]
    fn missing_default_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let previous = env::current_dir().unwrap();
        env::set_current_dir(dir.path()).unwrap();
        let config = TaskgateConfig::load(None).unwrap();
        env::set_current_dir(previous).unwrap();
        assert_eq!(config.run.risk_threshold, 60);
        assert_eq!(config.memory.binder_mode, "strict");
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = TaskgateConfig::load(Some(Path::new("/nonexistent/taskgate.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn explicit_path_overrides_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskgate.toml");
        fs::write(&path, "[run]\nrisk_threshold = 42\n").unwrap();
        let config = TaskgateConfig::load(Some(&path)).unwrap();
        assert_eq!(config.run.risk_threshold, 42);
        assert_eq!(config.run.run_root, PathBuf::from("runs"));
    }
}
