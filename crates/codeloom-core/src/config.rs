//! Workspace and per-user configuration.
//!
//! The workspace file is `.codeloom.yml` at the workspace root. The per-user
//! state lives in the platform config dir (`$XDG_CONFIG_HOME/codeloom`,
//! falling back to `~/.config/codeloom`, `%APPDATA%\codeloom` on Windows):
//! `config.json`, `history.txt`, and `debug/llm-response.log`.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const WORKSPACE_CONFIG_FILE: &str = ".codeloom.yml";

/// Scratch directory codeloom keeps inside the workspace (logs, etc.).
/// Search and listing always skip it.
pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".codeloom")
}

/// Launch description for one MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }
}

/// Per-workspace configuration (`.codeloom.yml`). All keys optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Shell command run after any successful file-modifying tool call.
    pub test_command: Option<String>,
    /// MCP server table: name → launch description.
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Hints for search and listing.
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    /// Free-form notes injected into the system prompt.
    pub notes: Option<String>,
}

impl WorkspaceConfig {
    pub fn path(workspace: &Path) -> PathBuf {
        workspace.join(WORKSPACE_CONFIG_FILE)
    }

    /// Load the workspace config, returning defaults when the file is absent.
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = Self::path(workspace);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        fs::write(Self::path(workspace), serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

/// Persisted per-user settings (`config.json` in the state dir).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl UserConfig {
    pub fn load() -> Result<Self> {
        let Some(path) = config_file_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = config_file_path() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

/// Per-user state directory, honoring platform conventions.
pub fn state_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Some(PathBuf::from(appdata).join("codeloom"));
        }
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Some(PathBuf::from(xdg).join("codeloom"));
        }
    }
    let home = std::env::var("HOME")
        .ok()
        .or_else(|| std::env::var("USERPROFILE").ok())?;
    Some(PathBuf::from(home).join(".config").join("codeloom"))
}

pub fn config_file_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("config.json"))
}

pub fn history_file_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("history.txt"))
}

pub fn debug_log_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("debug").join("llm-response.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_config_round_trips_through_yaml() {
        let mut cfg = WorkspaceConfig {
            test_command: Some("cargo test".to_string()),
            notes: Some("prefer small diffs".to_string()),
            ..WorkspaceConfig::default()
        };
        cfg.mcp_servers.insert(
            "files".to_string(),
            McpServerConfig {
                command: "npx".to_string(),
                args: vec!["@modelcontextprotocol/server-filesystem".to_string()],
                ..McpServerConfig::default()
            },
        );

        let dir = tempfile::tempdir().expect("tempdir");
        cfg.save(dir.path()).expect("save");
        let loaded = WorkspaceConfig::load(dir.path()).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_workspace_config_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = WorkspaceConfig::load(dir.path()).expect("load");
        assert_eq!(loaded, WorkspaceConfig::default());
    }

    #[test]
    fn camel_case_keys_are_accepted() {
        let yaml = "testCommand: \"exit 0\"\nmcpServers:\n  demo:\n    command: node\n    args: [server.js]\n";
        let cfg: WorkspaceConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(cfg.test_command.as_deref(), Some("exit 0"));
        assert_eq!(cfg.mcp_servers["demo"].command, "node");
        assert_eq!(cfg.mcp_servers["demo"].args, vec!["server.js".to_string()]);
    }
}
