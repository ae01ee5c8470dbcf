//! Error types for MCP operations.

use crate::jsonrpc::{ErrorKind, ErrorObject};
use thiserror::Error;

/// Errors from an MCP connection.
///
/// `ConnectionLost` and `Frame` are connection-level: once seen, every pending
/// and future call on the connection fails. Everything else belongs to a
/// single request.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("Connection to MCP peer lost")]
    ConnectionLost,

    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Remote error ({kind}, code {code}): {message}")]
    Remote {
        kind: ErrorKind,
        code: i64,
        message: String,
    },

    #[error("Framing error: {0}")]
    Frame(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported protocol version '{0}'")]
    UnsupportedVersion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// The wire error kind, if this error came from the remote side.
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            McpError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, McpError::ConnectionLost | McpError::Frame(_))
    }
}

impl From<ErrorObject> for McpError {
    fn from(error: ErrorObject) -> Self {
        McpError::Remote {
            kind: error.kind(),
            code: error.code,
            message: error.message,
        }
    }
}
