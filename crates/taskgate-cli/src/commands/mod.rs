// taskgate-cli/src/commands/mod.rs
// ============================================================================
// Module: CLI Command Handlers
// Description: Groups per-subcommand handler modules.
// Purpose: Keep `main.rs` to parsing and dispatch only.
// Dependencies: crate::{daemon, run, memory}
// ============================================================================

pub mod alertgate;
pub mod daemon;
pub mod dlq;
pub mod memory;
pub mod run;

/// Reads and parses a JSON file, wrapping I/O and parse failures in a
/// [`crate::CliError`] that names both the field and the path.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(field: &str, path: &std::path::Path) -> crate::CliResult<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| crate::CliError::new(format!("{field}: failed to read {}: {err}", path.display())))?;
    serde_json::from_str(&raw).map_err(|err| crate::CliError::new(format!("{field}: failed to parse {}: {err}", path.display())))
}
