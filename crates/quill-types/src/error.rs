//! Error hierarchy for Quill.

use thiserror::Error;

/// Top-level error type for a chat session.
#[derive(Debug, Error)]
pub enum QuillError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Errors from the chat-completion service.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Server overloaded")]
    Overloaded,

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream parse error: {0}")]
    StreamParse(String),

    #[error("Request timeout")]
    Timeout,
}

/// Errors from tool lookup and execution.
///
/// Each variant maps to a distinct wire error kind so a remote caller can
/// tell a missing tool from bad arguments from a failing handler.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidInput { tool: String, message: String },

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Tool '{name}' is already registered")]
    Duplicate { name: String },

    /// The tool needed a completion from the client and could not get one.
    #[error("Tool sampling failed: {0}")]
    Sampling(#[from] SamplingError),
}

/// Errors from the sampling callback (server asks the client for a completion).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SamplingError {
    /// The client never advertised the sampling capability.
    #[error("Sampling is not available on this connection")]
    Unavailable,

    /// The completion service behind the client failed.
    #[error("Upstream completion failed: {0}")]
    Upstream(String),

    /// The request never got an answer (connection lost, timed out).
    #[error("Sampling request failed: {0}")]
    Transport(String),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
