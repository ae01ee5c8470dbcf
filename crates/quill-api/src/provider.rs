//! `Provider` implementation backed by the Anthropic Messages API.

use crate::client::ApiClient;
use crate::retry::RetryConfig;
use quill_types::provider::{EventStream, Provider};
use quill_types::{ApiError, BoxFuture, CreateMessageRequest};

/// Anthropic Messages API provider. Retries happen inside [`ApiClient`].
#[derive(Clone)]
pub struct AnthropicProvider {
    client: ApiClient,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self::from_client(ApiClient::new(api_key, base_url)?))
    }

    pub fn from_client(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.client = self.client.with_retry_config(config);
        self
    }
}

impl Provider for AnthropicProvider {
    fn create_message_stream<'a>(
        &'a self,
        request: &'a CreateMessageRequest,
    ) -> BoxFuture<'a, Result<EventStream, ApiError>> {
        Box::pin(async move {
            let stream = self.client.create_message_stream(request).await?;
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
