//! Exposes a remote server tool as a local `quill_types::Tool`.

use crate::client::McpClient;
use crate::error::McpError;
use crate::jsonrpc::ErrorKind;
use crate::protocol::ToolDescriptor;
use quill_types::{BoxFuture, SamplingError, ToolContext, ToolDefinition, ToolError, ToolOutput};
use std::sync::Arc;

/// A tool backed by an MCP server, advertised to the model under its server-side name.
pub struct McpTool {
    descriptor: ToolDescriptor,
    client: Arc<McpClient>,
}

impl McpTool {
    pub fn new(descriptor: ToolDescriptor, client: Arc<McpClient>) -> Self {
        Self { descriptor, client }
    }

    /// One wrapper per tool the client discovered at handshake.
    pub fn all(client: &Arc<McpClient>) -> Vec<McpTool> {
        client
            .tools()
            .iter()
            .cloned()
            .map(|descriptor| McpTool::new(descriptor, Arc::clone(client)))
            .collect()
    }
}

impl quill_types::Tool for McpTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn definition(&self) -> ToolDefinition {
        self.descriptor.clone().into()
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let result = self
                .client
                .call_tool(&self.descriptor.name, input)
                .await
                .map_err(|e| remote_tool_error(&self.descriptor.name, e))?;
            Ok(result.into())
        })
    }
}

/// Translate a failed `tools/call` back into the local tool error taxonomy.
fn remote_tool_error(tool: &str, error: McpError) -> ToolError {
    match error {
        McpError::Remote { kind, message, .. } => match kind {
            ErrorKind::ToolNotFound => ToolError::UnknownTool {
                name: tool.to_string(),
            },
            ErrorKind::InvalidArguments | ErrorKind::InvalidParams => ToolError::InvalidInput {
                tool: tool.to_string(),
                message,
            },
            ErrorKind::SamplingUnavailable => ToolError::Sampling(SamplingError::Unavailable),
            ErrorKind::UpstreamError => ToolError::Sampling(SamplingError::Upstream(message)),
            _ => ToolError::ExecutionFailed(message),
        },
        McpError::Timeout { timeout_ms, .. } => ToolError::Timeout { timeout_ms },
        other => ToolError::ExecutionFailed(other.to_string()),
    }
}
