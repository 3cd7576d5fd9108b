pub mod client;
pub mod jsonrpc;
pub mod manager;

pub use client::{McpClient, RemoteTool};
pub use manager::{McpManager, SAFE_LAUNCHERS};

#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    #[error("failed to spawn MCP server: {0}")]
    Spawn(String),
    #[error("MCP request '{method}' to '{server}' timed out")]
    Timeout { server: String, method: String },
    #[error("MCP server connection closed")]
    Closed,
    #[error("MCP server error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("MCP protocol error: {0}")]
    Protocol(String),
    #[error("MCP i/o error: {0}")]
    Io(String),
}
