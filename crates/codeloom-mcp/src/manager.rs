//! Spawns configured MCP servers and registers their tools.

use crate::client::{McpClient, RemoteTool};
use codeloom_core::ToolDefinition;
use codeloom_core::config::{McpServerConfig, WorkspaceConfig};
use codeloom_policy::command_base_name;
use codeloom_tools::{Tool, ToolError, ToolRegistry, ToolSuccess};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Launchers that may start an MCP server without confirmation: the fixed
/// set of known interpreters.
pub const SAFE_LAUNCHERS: &[&str] = &[
    "node", "npx", "deno", "bun", "python", "python3", "uv", "uvx",
];

/// Callback asking the user whether an unusual launcher may run.
/// Arguments: server name, launcher command.
pub type LauncherConfirm<'a> = &'a dyn Fn(&str, &str) -> bool;

pub struct McpManager {
    clients: Vec<Arc<McpClient>>,
    warnings: Vec<String>,
}

impl McpManager {
    /// Spawn every configured server, discover its tools, and register
    /// `mcp_<server>_<tool>` adapters. Collisions and per-server failures
    /// are recorded as warnings, never fatal. In non-interactive sessions
    /// (`confirm` is `None`) servers with unknown launchers are skipped.
    pub fn start(
        config: &WorkspaceConfig,
        registry: &mut ToolRegistry,
        confirm: Option<LauncherConfirm<'_>>,
    ) -> Self {
        let mut manager = Self {
            clients: Vec::new(),
            warnings: Vec::new(),
        };
        for (server, server_config) in &config.mcp_servers {
            manager.start_one(server, server_config, registry, confirm);
        }
        manager
    }

    fn start_one(
        &mut self,
        server: &str,
        server_config: &McpServerConfig,
        registry: &mut ToolRegistry,
        confirm: Option<LauncherConfirm<'_>>,
    ) {
        let launcher = command_base_name(&server_config.command);
        if !SAFE_LAUNCHERS.contains(&launcher.as_str()) {
            let approved = match confirm {
                Some(ask) => ask(server, &server_config.command),
                None => false,
            };
            if !approved {
                self.warnings.push(format!(
                    "skipping MCP server '{server}': launcher '{launcher}' is not on the safe list"
                ));
                return;
            }
        }

        let client = match McpClient::connect(server, server_config) {
            Ok(client) => client,
            Err(err) => {
                self.warnings
                    .push(format!("MCP server '{server}' failed to start: {err}"));
                return;
            }
        };
        if let Err(err) = client.initialize() {
            self.warnings
                .push(format!("MCP server '{server}' failed to initialize: {err}"));
            client.shutdown();
            return;
        }
        let tools = match client.list_tools() {
            Ok(tools) => tools,
            Err(err) => {
                self.warnings
                    .push(format!("MCP server '{server}' tool discovery failed: {err}"));
                client.shutdown();
                return;
            }
        };

        for remote in tools {
            let tool = adapter_tool(client.clone(), server, &remote);
            let name = tool.definition.name.clone();
            if let Err(ToolError::DuplicateTool(_)) = registry.register(tool) {
                self.warnings
                    .push(format!("tool name collision for '{name}'; skipping"));
            }
        }
        self.clients.push(client);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Disconnect every server, in parallel.
    pub fn shutdown(self) {
        std::thread::scope(|scope| {
            for client in &self.clients {
                scope.spawn(move || client.shutdown());
            }
        });
    }
}

/// Wrap a remote tool into the registry's contract. Adapted tools are never
/// `safe`: the client cannot know a remote tool's side effects.
fn adapter_tool(client: Arc<McpClient>, server: &str, remote: &RemoteTool) -> Tool {
    let definition = ToolDefinition {
        name: format!("mcp_{server}_{}", remote.name),
        description: format!("[{server}] {}", remote.description),
        parameters: remote.parameters.clone(),
        safe: false,
    };
    let remote_name = remote.name.clone();
    let server_name = server.to_string();
    Tool::new(
        definition,
        Arc::new(move |args| {
            let (text, is_error) = client
                .call_tool(&remote_name, args)
                .map_err(|err| ToolError::Other(err.to_string()))?;
            if is_error {
                return Err(ToolError::Other(text));
            }
            Ok(ToolSuccess::new(text).meta("server", server_name.clone()))
        }),
    )
}

/// Convenience used by tests and the CLI `mcp` listing: map a config table
/// to (server, launcher, safe?) rows without spawning anything.
pub fn launcher_report(servers: &BTreeMap<String, McpServerConfig>) -> Vec<(String, String, bool)> {
    servers
        .iter()
        .map(|(name, cfg)| {
            let launcher = command_base_name(&cfg.command);
            let safe = SAFE_LAUNCHERS.contains(&launcher.as_str());
            (name.clone(), launcher, safe)
        })
        .collect()
}
