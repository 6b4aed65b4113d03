//! Error types for the YouTrack MCP server.
//!
//! Tool-level failures are not errors here: they travel back to the client as
//! [`OperationError`](youtrack_gateway::OperationError) payloads inside a tool
//! result. This type covers what stops the server itself.

use thiserror::Error;

/// Errors that can occur while starting or running the server.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is incomplete or the HTTP client could not be built.
    #[error("Gateway setup failed: {0}")]
    Gateway(#[from] youtrack_gateway::Error),

    /// MCP protocol error.
    #[error("MCP error: {0}")]
    Mcp(String),
}

/// Result type for YouTrack MCP server operations.
pub type Result<T> = std::result::Result<T, Error>;
