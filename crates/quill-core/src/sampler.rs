//! Answers a tool server's sampling requests with the client's own provider.

use std::sync::Arc;

use futures_util::StreamExt;
use quill_types::{
    ApiError, BoxFuture, ContentBlock, CreateMessageRequest, Message, Role, Sampler,
    SamplingContent, SamplingError, SamplingRequest, SamplingResult, provider::Provider,
};

use crate::assembler::TurnAssembler;

/// Forwards `sampling/createMessage` to a completion provider.
///
/// Tools are never offered to the model here; the server wants plain text.
pub struct ProviderSampler {
    provider: Arc<dyn Provider>,
    model: String,
}

impl ProviderSampler {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    async fn complete(&self, request: SamplingRequest) -> Result<SamplingResult, ApiError> {
        let constraints = request.constraints;
        let api_request = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: constraints.max_tokens,
            messages: request
                .messages
                .into_iter()
                .map(|m| Message {
                    // Sampling prompts only carry user and assistant turns.
                    role: match m.role {
                        Role::Assistant => Role::Assistant,
                        Role::User | Role::Tool => Role::User,
                    },
                    content: vec![ContentBlock::Text {
                        text: m.content.text().to_string(),
                    }],
                })
                .collect(),
            system: constraints.system_prompt,
            tools: None,
            stop_sequences: constraints.stop_sequences,
            temperature: constraints.temperature,
            stream: true,
        };

        let mut stream = self.provider.create_message_stream(&api_request).await?;
        let mut assembler = TurnAssembler::new();
        while let Some(event) = stream.next().await {
            assembler.push(event?)?;
            if assembler.is_complete() {
                break;
            }
        }
        assembler.finish();

        Ok(SamplingResult {
            role: Role::Assistant,
            content: SamplingContent::Text {
                text: assembler.text(),
            },
            model: assembler.model().unwrap_or(self.model.as_str()).to_string(),
            stop_reason: assembler
                .stop_reason()
                .map(|r| r.as_sampling_str().to_string()),
        })
    }
}

impl Sampler for ProviderSampler {
    fn create_message(
        &self,
        request: SamplingRequest,
    ) -> BoxFuture<'_, Result<SamplingResult, SamplingError>> {
        Box::pin(async move {
            tracing::debug!(
                messages = request.messages.len(),
                max_tokens = request.constraints.max_tokens,
                "Forwarding sampling request to {}",
                self.provider.name()
            );
            self.complete(request).await.map_err(|e| {
                tracing::warn!("Sampling request failed upstream: {e}");
                SamplingError::Upstream(e.to_string())
            })
        })
    }
}
