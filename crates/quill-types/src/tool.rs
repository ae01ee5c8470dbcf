//! Tool trait and related types.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{BoxFuture, SamplingError, ToolDefinition, ToolError, sampling::Sampler};

/// Per-invocation context handed to a tool.
///
/// Cheap to clone. The sampler is present only when the tool runs on a
/// connection whose peer can answer sampling requests.
#[derive(Clone, Default)]
pub struct ToolContext {
    sampler: Option<Arc<dyn Sampler>>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sampler(sampler: Arc<dyn Sampler>) -> Self {
        Self {
            sampler: Some(sampler),
        }
    }

    /// The sampling handle, or `SamplingError::Unavailable`.
    pub fn sampler(&self) -> Result<&Arc<dyn Sampler>, SamplingError> {
        self.sampler
            .as_ref()
            .filter(|sampler| sampler.is_available())
            .ok_or(SamplingError::Unavailable)
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("sampler", &self.sampler.is_some())
            .finish()
    }
}

/// Result of executing a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ToolOutputContent>,
    pub is_error: bool,
}

/// A single piece of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutputContent {
    Text { text: String },
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error text output.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Create a successful output holding pretty-printed JSON.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ToolError> {
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode result: {e}")))?;
        Ok(Self::text(text))
    }

    /// All text content joined by newlines.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolOutputContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A named, schema-described operation.
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// The descriptor advertised to callers (name, description, input schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with already-validated JSON arguments.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolOutput, ToolError>>;
}
