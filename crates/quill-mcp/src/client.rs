//! MCP client: manages one server connection.
//!
//! Performs the handshake (initialize + initialized notification), tool
//! discovery (tools/list) and tool invocation (tools/call), and answers the
//! server's reversed `sampling/createMessage` calls with the configured sampler.

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::jsonrpc::{ErrorKind, ErrorObject};
use crate::peer::{Connection, Peer, PeerOptions, RequestHandler};
use crate::protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, Implementation, InitializeParams,
    InitializeResult, ListToolsResult, SamplingCapability, ServerCapabilities, ToolDescriptor,
    PROTOCOL_VERSION, is_supported_version, methods,
};
use crate::sampling::sampling_error_object;
use quill_types::{BoxFuture, Sampler, SamplingRequest};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Client-side settings for a connection.
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Answers sampling requests. Advertised as the `sampling` capability when set.
    pub sampler: Option<Arc<dyn Sampler>>,
}

impl ClientOptions {
    pub fn with_sampler(sampler: Arc<dyn Sampler>) -> Self {
        Self {
            sampler: Some(sampler),
        }
    }
}

/// Client for a single MCP server.
pub struct McpClient {
    connection: Connection,
    server_info: Implementation,
    capabilities: ServerCapabilities,
    protocol_version: String,
    instructions: Option<String>,
    tools: Vec<ToolDescriptor>,
}

impl McpClient {
    /// Connect to an MCP server: spawn, handshake, discover tools.
    pub async fn connect(
        name: &str,
        config: &McpServerConfig,
        options: ClientOptions,
    ) -> Result<Self, McpError> {
        let handler = Arc::new(ClientHandler {
            sampler: options.sampler.clone(),
        });
        let connection = Connection::spawn(
            name,
            &config.command,
            &config.args,
            &config.env,
            handler,
            PeerOptions {
                default_timeout: Some(Duration::from_millis(config.timeout_ms)),
            },
        )?;
        Self::establish(connection, options.sampler.is_some()).await
    }

    /// Run the client side of the protocol over an existing pair of streams.
    pub async fn connect_with_io<R, W>(
        name: &str,
        reader: R,
        writer: W,
        options: ClientOptions,
        peer_options: PeerOptions,
    ) -> Result<Self, McpError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handler = Arc::new(ClientHandler {
            sampler: options.sampler.clone(),
        });
        let connection = Connection::new(name, reader, writer, handler, peer_options);
        Self::establish(connection, options.sampler.is_some()).await
    }

    async fn establish(connection: Connection, sampling: bool) -> Result<Self, McpError> {
        match handshake(connection.peer(), sampling).await {
            Ok((init, tools)) => {
                tracing::info!(
                    "MCP server '{}' ({} {}) connected with {} tools",
                    connection.peer().name(),
                    init.server_info.name,
                    init.server_info.version,
                    tools.len()
                );
                Ok(Self {
                    connection,
                    server_info: init.server_info,
                    capabilities: init.capabilities,
                    protocol_version: init.protocol_version,
                    instructions: init.instructions,
                    tools,
                })
            }
            Err(e) => {
                connection.shutdown().await;
                Err(e)
            }
        }
    }

    /// Ask the server for its tools. Idempotent; does not replace [`Self::tools`].
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        list_tools(self.peer()).await
    }

    /// Call a tool on this server.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        let params = serde_json::to_value(CallToolParams {
            name: tool_name.to_string(),
            arguments,
        })?;
        let result = self.peer().call(methods::TOOLS_CALL, Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        self.peer().call(methods::PING, None).await.map(|_| ())
    }

    /// Tools discovered during the handshake, in server order.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// The local name this connection was opened under.
    pub fn server_name(&self) -> &str {
        self.connection.peer().name()
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn peer(&self) -> &Peer {
        self.connection.peer()
    }

    /// Shut down the server connection.
    pub async fn shutdown(self) {
        self.connection.shutdown().await;
    }
}

async fn handshake(
    peer: &Peer,
    sampling: bool,
) -> Result<(InitializeResult, Vec<ToolDescriptor>), McpError> {
    let params = InitializeParams {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ClientCapabilities {
            sampling: sampling.then(SamplingCapability::default),
        },
        client_info: Implementation {
            name: "quill".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };

    let result = peer
        .call(methods::INITIALIZE, Some(serde_json::to_value(params)?))
        .await?;
    let init: InitializeResult = serde_json::from_value(result)
        .map_err(|e| McpError::Protocol(format!("Failed to parse initialize result: {e}")))?;
    if !is_supported_version(&init.protocol_version) {
        return Err(McpError::UnsupportedVersion(init.protocol_version));
    }

    peer.notify(methods::INITIALIZED, None).await?;

    let tools = if init.capabilities.supports_tools() {
        list_tools(peer).await?
    } else {
        tracing::debug!("[{}] Server does not advertise tools", peer.name());
        Vec::new()
    };
    Ok((init, tools))
}

async fn list_tools(peer: &Peer) -> Result<Vec<ToolDescriptor>, McpError> {
    let result = peer.call(methods::TOOLS_LIST, None).await?;
    let list: ListToolsResult = serde_json::from_value(result)
        .map_err(|e| McpError::Protocol(format!("Failed to parse tools/list response: {e}")))?;
    Ok(list.tools)
}

/// Answers the requests a server sends to its client.
struct ClientHandler {
    sampler: Option<Arc<dyn Sampler>>,
}

impl RequestHandler for ClientHandler {
    fn handle_request<'a>(
        &'a self,
        peer: &'a Peer,
        method: &'a str,
        params: Option<Value>,
    ) -> BoxFuture<'a, Result<Value, ErrorObject>> {
        Box::pin(async move {
            match method {
                methods::SAMPLING_CREATE_MESSAGE => {
                    let Some(sampler) = &self.sampler else {
                        tracing::warn!(
                            "[{}] Server requested sampling, which this client does not offer",
                            peer.name()
                        );
                        return Err(ErrorObject::new(
                            ErrorKind::SamplingUnavailable,
                            "client does not support sampling",
                        ));
                    };
                    let request: SamplingRequest =
                        serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
                            ErrorObject::new(ErrorKind::InvalidParams, e.to_string())
                        })?;
                    let result = sampler
                        .create_message(request)
                        .await
                        .map_err(|e| sampling_error_object(&e))?;
                    serde_json::to_value(result)
                        .map_err(|e| ErrorObject::new(ErrorKind::InternalError, e.to_string()))
                }
                methods::PING => Ok(serde_json::json!({})),
                other => Err(ErrorObject::new(
                    ErrorKind::MethodNotFound,
                    format!("Method not found: {other}"),
                )),
            }
        })
    }
}
