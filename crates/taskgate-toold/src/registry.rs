// taskgate-toold/src/registry.rs
// ============================================================================
// Module: Tool Registry
// Description: Loads tool manifests either from one JSON registry file or
// from a directory of per-tool manifest files.
// Purpose: Back ListTools/GetTool and SkillExecute's tool lookup.
// Dependencies: serde, serde_json, std::fs
// ============================================================================

//! ## Overview
//! A tool entry describes how `SkillExecute` should run a skill: which
//! `executor_backend` handles it, and (for the `local_process` backend) the
//! argv template and optional environment allowlist. [`ToolRegistry::load`]
//! prefers a directory of `*.json` manifests, one per tool, and falls back
//! to a single combined registry file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// One registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    /// The tool's identifier, e.g. `"job.noop"`.
    pub tool_id: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Semantic version of the tool's contract.
    #[serde(default = "default_tool_version")]
    pub version: String,
    /// Which executor backend runs this tool: `"builtin"` or `"local_process"`.
    pub executor_backend: String,
    /// Argv template for the `local_process` backend. Ignored otherwise.
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Optional environment variable allowlist for the `local_process` backend.
    #[serde(default)]
    pub env_allowlist: Option<Vec<String>>,
}

fn default_tool_version() -> String {
    "0.1.0".to_string()
}

/// Errors raised while loading the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A registry source could not be read from disk.
    #[error("failed to read registry source {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A manifest file did not parse as a [`ToolEntry`] or entry list.
    #[error("failed to parse registry source {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// Neither a manifest directory nor a registry file was found.
    #[error("no tool registry found at {0}")]
    NotFound(PathBuf),
}

/// In-memory table of registered tools.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolEntry>,
}

impl ToolRegistry {
    /// Builds a registry directly from entries, mainly for tests and the
    /// built-in sentinel skills.
    #[must_use]
    pub fn from_entries(entries: Vec<ToolEntry>) -> Self {
        Self { tools: entries.into_iter().map(|entry| (entry.tool_id.clone(), entry)).collect() }
    }

    /// Loads a registry from `source`: a directory of per-tool `*.json`
    /// manifests if `source` is a directory, or a single JSON array of
    /// [`ToolEntry`] values if `source` is a file.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if `source` does not exist, cannot be read,
    /// or does not parse as the expected shape.
    pub fn load(source: &Path) -> Result<Self, RegistryError> {
        if !source.exists() {
            return Err(RegistryError::NotFound(source.to_path_buf()));
        }
        if source.is_dir() {
            return Self::load_from_manifest_dir(source);
        }
        Self::load_from_registry_file(source)
    }

    fn load_from_manifest_dir(dir: &Path) -> Result<Self, RegistryError> {
        let mut tools = BTreeMap::new();
        let entries = std::fs::read_dir(dir).map_err(|source| RegistryError::Io { path: dir.to_path_buf(), source })?;
        for entry in entries {
            let entry = entry.map_err(|source| RegistryError::Io { path: dir.to_path_buf(), source })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|source| RegistryError::Io { path: path.clone(), source })?;
            let tool: ToolEntry = serde_json::from_str(&raw).map_err(|source| RegistryError::Parse { path: path.clone(), source })?;
            tools.insert(tool.tool_id.clone(), tool);
        }
        Ok(Self { tools })
    }

    fn load_from_registry_file(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io { path: path.to_path_buf(), source })?;
        let entries: Vec<ToolEntry> =
            serde_json::from_str(&raw).map_err(|source| RegistryError::Parse { path: path.to_path_buf(), source })?;
        Ok(Self::from_entries(entries))
    }

    /// Inserts or replaces a tool entry.
    pub fn insert(&mut self, entry: ToolEntry) {
        self.tools.insert(entry.tool_id.clone(), entry);
    }

    /// Looks up a tool by id.
    #[must_use]
    pub fn get(&self, tool_id: &str) -> Option<&ToolEntry> {
        self.tools.get(tool_id)
    }

    /// Lists every registered tool, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<ToolEntry> {
        self.tools.values().cloned().collect()
    }

    /// Number of registered tools, surfaced as `ListCapabilities`'s
    /// `tool_count` flag.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::*;

    #[test]
    fn loading_a_single_registry_file_returns_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            serde_json::to_string(&vec![ToolEntry {
                tool_id: "job.noop".to_string(),
                description: "always succeeds".to_string(),
                version: "0.1.0".to_string(),
                executor_backend: "builtin".to_string(),
                entrypoint: Vec::new(),
                env_allowlist: None,
            }])
            .unwrap(),
        )
        .unwrap();
        let registry = ToolRegistry::load(&path).unwrap();
        assert_eq!(registry.tool_count(), 1);
        assert!(registry.get("job.noop").is_some());
    }

    #[test]
    fn loading_a_manifest_directory_merges_every_json_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("job.log.json"),
            serde_json::to_string(&ToolEntry {
                tool_id: "job.log".to_string(),
                description: String::new(),
                version: "0.1.0".to_string(),
                executor_backend: "builtin".to_string(),
                entrypoint: Vec::new(),
                env_allowlist: None,
            })
            .unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not json").unwrap();
        let registry = ToolRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.tool_count(), 1);
    }

    #[test]
    fn a_missing_source_fails_closed() {
        let result = ToolRegistry::load(Path::new("/nonexistent/registry.json"));
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }
}
