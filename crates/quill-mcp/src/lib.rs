//! MCP (Model Context Protocol) over newline-delimited JSON-RPC 2.0.
//!
//! Both ends share one engine: a [`Connection`] owns the reader and writer
//! tasks for a byte stream, and its [`Peer`] handle correlates outbound calls
//! with their responses while inbound requests go to a [`RequestHandler`].
//! [`McpClient`] spawns a server process and drives the handshake;
//! [`McpServer`] answers it from a tool registry and can call back into the
//! client for sampling.

pub mod client;
pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod peer;
pub mod protocol;
pub mod sampling;
pub mod server;
pub mod tool;
mod transport;

pub use client::{ClientOptions, McpClient};
pub use config::McpServerConfig;
pub use error::McpError;
pub use jsonrpc::{ErrorKind, ErrorObject};
pub use peer::{Connection, Peer, PeerOptions, RequestHandler};
pub use protocol::{CallToolResult, Implementation, ToolContent, ToolDescriptor};
pub use sampling::SamplingBridge;
pub use server::McpServer;
pub use tool::McpTool;
pub use transport::MAX_FRAME_BYTES;
