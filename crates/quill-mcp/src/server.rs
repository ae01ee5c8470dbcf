//! MCP server: answers the handshake, tool discovery and tool invocation.

use crate::error::McpError;
use crate::jsonrpc::{ErrorKind, ErrorObject};
use crate::peer::{Connection, Peer, PeerOptions, RequestHandler};
use crate::protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, Implementation, InitializeParams,
    InitializeResult, ListToolsResult, ServerCapabilities, ToolDescriptor, ToolsCapability,
    methods, negotiate_version,
};
use crate::sampling::SamplingBridge;
use quill_tools::ToolRegistry;
use quill_types::{BoxFuture, SamplingError, ToolContext, ToolError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncWrite};

/// A tool server. Each served connection gets its own handshake state.
pub struct McpServer {
    info: Implementation,
    registry: Arc<ToolRegistry>,
    instructions: Option<String>,
    options: PeerOptions,
}

impl McpServer {
    pub fn new(name: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            info: Implementation {
                name: name.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            registry,
            instructions: None,
            options: PeerOptions::default(),
        }
    }

    /// Usage hints returned to the client in the `initialize` result.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Connection options; the timeout bounds sampling calls made by tools.
    pub fn with_options(mut self, options: PeerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Start serving one connection over the given streams.
    pub fn serve<R, W>(&self, reader: R, writer: W) -> Connection
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handler = Arc::new(ServerHandler {
            info: self.info.clone(),
            registry: Arc::clone(&self.registry),
            instructions: self.instructions.clone(),
            client: OnceLock::new(),
        });
        Connection::new(
            self.info.name.clone(),
            reader,
            writer,
            handler,
            self.options.clone(),
        )
    }

    /// Serve the process's stdin/stdout until the client hangs up.
    pub async fn serve_stdio(&self) -> Result<(), McpError> {
        let connection = self.serve(tokio::io::stdin(), tokio::io::stdout());
        tracing::info!(
            "MCP server '{}' serving {} tool(s) on stdio",
            self.info.name,
            self.registry.len()
        );
        connection.closed().await;
        tracing::info!("Client disconnected; shutting down");
        connection.shutdown().await;
        Ok(())
    }
}

struct ServerHandler {
    info: Implementation,
    registry: Arc<ToolRegistry>,
    instructions: Option<String>,
    /// Set once by `initialize`; its presence gates the tool methods.
    client: OnceLock<ClientCapabilities>,
}

impl ServerHandler {
    fn initialize(&self, params: Option<Value>) -> Result<Value, ErrorObject> {
        let params: InitializeParams = parse_params(params)?;
        if self.client.set(params.capabilities.clone()).is_err() {
            return Err(ErrorObject::new(
                ErrorKind::InvalidRequest,
                "initialize may only be sent once",
            ));
        }

        let version = negotiate_version(&params.protocol_version);
        tracing::info!(
            "Client '{}' {} connected (protocol {}, sampling: {})",
            params.client_info.name,
            params.client_info.version,
            version,
            params.capabilities.supports_sampling()
        );

        to_result(&InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
        })
    }

    fn client_capabilities(&self) -> Result<&ClientCapabilities, ErrorObject> {
        self.client.get().ok_or_else(|| {
            ErrorObject::new(
                ErrorKind::InvalidRequest,
                "server has not been initialized",
            )
        })
    }

    fn list_tools(&self) -> Result<Value, ErrorObject> {
        self.client_capabilities()?;
        to_result(&ListToolsResult {
            tools: self
                .registry
                .definitions()
                .into_iter()
                .map(ToolDescriptor::from)
                .collect(),
        })
    }

    async fn call_tool(&self, peer: &Peer, params: Option<Value>) -> Result<Value, ErrorObject> {
        let capabilities = self.client_capabilities()?.clone();
        let CallToolParams { name, arguments } = parse_params(params)?;

        let ctx = ToolContext::with_sampler(Arc::new(SamplingBridge::new(
            peer.clone(),
            capabilities,
        )));
        tracing::debug!("Calling tool '{name}'");
        match self.registry.execute(&name, arguments, ctx).await {
            Ok(output) => to_result(&CallToolResult::from(output)),
            Err(e) => {
                tracing::debug!("Tool '{name}' failed: {e}");
                Err(tool_error_object(&e))
            }
        }
    }
}

impl RequestHandler for ServerHandler {
    fn handle_request<'a>(
        &'a self,
        peer: &'a Peer,
        method: &'a str,
        params: Option<Value>,
    ) -> BoxFuture<'a, Result<Value, ErrorObject>> {
        Box::pin(async move {
            match method {
                methods::INITIALIZE => self.initialize(params),
                methods::PING => Ok(serde_json::json!({})),
                methods::TOOLS_LIST => self.list_tools(),
                methods::TOOLS_CALL => self.call_tool(peer, params).await,
                other => Err(ErrorObject::new(
                    ErrorKind::MethodNotFound,
                    format!("Method not found: {other}"),
                )),
            }
        })
    }

    fn handle_notification(&self, peer: &Peer, method: &str, _params: Option<Value>) {
        match method {
            methods::INITIALIZED => tracing::debug!("[{}] Client finished initialization", peer.name()),
            methods::CANCELLED => tracing::debug!("[{}] Client cancelled a request", peer.name()),
            other => tracing::debug!("[{}] Ignoring notification '{other}'", peer.name()),
        }
    }
}

/// The wire error for a failed tool call.
pub fn tool_error_object(error: &ToolError) -> ErrorObject {
    let kind = match error {
        ToolError::UnknownTool { .. } => ErrorKind::ToolNotFound,
        ToolError::InvalidInput { .. } => ErrorKind::InvalidArguments,
        ToolError::Sampling(SamplingError::Unavailable) => ErrorKind::SamplingUnavailable,
        ToolError::Sampling(SamplingError::Upstream(_)) => ErrorKind::UpstreamError,
        ToolError::ExecutionFailed(_)
        | ToolError::Timeout { .. }
        | ToolError::Duplicate { .. }
        | ToolError::Sampling(SamplingError::Transport(_)) => ErrorKind::ToolExecutionError,
    };
    ErrorObject::new(kind, error.to_string())
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorObject> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| ErrorObject::new(ErrorKind::InvalidParams, e.to_string()))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, ErrorObject> {
    serde_json::to_value(value).map_err(|e| ErrorObject::new(ErrorKind::InternalError, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_errors_map_to_distinct_kinds() {
        let cases = [
            (
                ToolError::UnknownTool { name: "x".into() },
                ErrorKind::ToolNotFound,
            ),
            (
                ToolError::InvalidInput {
                    tool: "x".into(),
                    message: "bad".into(),
                },
                ErrorKind::InvalidArguments,
            ),
            (
                ToolError::ExecutionFailed("boom".into()),
                ErrorKind::ToolExecutionError,
            ),
            (
                ToolError::Sampling(SamplingError::Unavailable),
                ErrorKind::SamplingUnavailable,
            ),
            (
                ToolError::Sampling(SamplingError::Upstream("down".into())),
                ErrorKind::UpstreamError,
            ),
        ];
        for (error, kind) in cases {
            assert_eq!(tool_error_object(&error).kind(), kind, "{error}");
        }
    }

    #[test]
    fn missing_params_are_invalid() {
        let err = parse_params::<CallToolParams>(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
    }
}
