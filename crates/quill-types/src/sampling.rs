//! Sampling: a tool server asking its client for an LLM completion.

use serde::{Deserialize, Serialize, Serializer};

use crate::{BoxFuture, Role, SamplingError};

/// Default generation budget when a sampling request does not name one.
pub const DEFAULT_SAMPLING_MAX_TOKENS: u32 = 1024;

/// Text content of a sampling message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SamplingContent {
    Text { text: String },
}

impl SamplingContent {
    pub fn text(&self) -> &str {
        match self {
            SamplingContent::Text { text } => text,
        }
    }
}

/// One prompt entry of a sampling request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingMessage {
    #[serde(serialize_with = "serialize_sampling_role")]
    pub role: Role,
    pub content: SamplingContent,
}

/// Sampling prompts only know `user` and `assistant`.
fn serialize_sampling_role<S: Serializer>(role: &Role, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(role.api_role())
}

impl SamplingMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: SamplingContent::Text { text: text.into() },
        }
    }
}

/// Optional generation parameters for a sampling request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_SAMPLING_MAX_TOKENS
}

impl Default for SamplingConstraints {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tokens: DEFAULT_SAMPLING_MAX_TOKENS,
            temperature: None,
            stop_sequences: None,
        }
    }
}

/// Parameters of `sampling/createMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingRequest {
    pub messages: Vec<SamplingMessage>,
    #[serde(flatten)]
    pub constraints: SamplingConstraints,
}

/// Result of `sampling/createMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingResult {
    pub role: Role,
    pub content: SamplingContent,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl SamplingResult {
    pub fn text(&self) -> &str {
        self.content.text()
    }
}

/// Something that can answer a sampling request.
///
/// On the server this is the bridge that forwards the request to the client;
/// on the client it is the handler that forwards it to the completion service.
pub trait Sampler: Send + Sync {
    /// Whether requests can be answered at all. An unavailable sampler fails
    /// every request with `SamplingError::Unavailable`.
    fn is_available(&self) -> bool {
        true
    }

    fn create_message(
        &self,
        request: SamplingRequest,
    ) -> BoxFuture<'_, Result<SamplingResult, SamplingError>>;
}
