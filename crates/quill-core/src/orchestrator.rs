//! The chat loop: stream a model response, run the tools it asks for, repeat.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::join_all;
use quill_tools::ToolRegistry;
use quill_types::{
    ContentBlock, Conversation, CreateMessageRequest, Message, QuillError, Role, ToolContext,
    ToolError, ToolOutput, ToolResultContent, Usage, provider::Provider,
};
use tokio_util::sync::CancellationToken;

use crate::assembler::{ToolCallDirective, TurnAssembler, TurnEvent};

/// Maximum number of model→tool round trips in one user turn.
pub const MAX_TOOL_LOOPS: usize = 25;

/// Progress reported while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A text fragment from the assistant.
    TextDelta(String),
    /// A tool call is about to run.
    ToolStart {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// A tool call finished.
    ToolEnd {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// Usage accumulated over the whole turn.
    Usage(Usage),
    /// The model finished without asking for more tools.
    Done,
    /// The turn was cancelled.
    Cancelled,
    /// The turn failed.
    Error(String),
}

/// Drives a conversation against a completion provider and a set of tools.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    model: String,
    max_tokens: u32,
    system_prompt: Option<String>,
    max_tool_loops: usize,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            registry,
            model: model.into(),
            max_tokens,
            system_prompt: None,
            max_tool_loops: MAX_TOOL_LOOPS,
        }
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = Some(prompt.into());
    }

    pub fn set_max_tool_loops(&mut self, loops: usize) {
        self.max_tool_loops = loops;
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one user turn to completion.
    ///
    /// Appends the user message, then alternates between streaming a model
    /// response and running the tools it requested until the model stops
    /// asking for tools. Tool failures are handed back to the model as error
    /// results. An assistant message that requested tools is appended together
    /// with its results, so a cancelled turn never leaves a dangling tool call
    /// in the conversation.
    pub async fn run_turn<F>(
        &self,
        conversation: &mut Conversation,
        user_input: &str,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> Result<Usage, QuillError>
    where
        F: FnMut(ChatEvent),
    {
        conversation.push(Message::user(user_input));
        let mut total_usage = Usage::default();

        for _ in 0..self.max_tool_loops {
            let (content, calls) = match self
                .stream_response(conversation, &cancel, &mut on_event, &mut total_usage)
                .await
            {
                Ok(response) => response,
                Err(QuillError::Cancelled) => {
                    on_event(ChatEvent::Cancelled);
                    return Err(QuillError::Cancelled);
                }
                Err(e) => {
                    on_event(ChatEvent::Error(e.to_string()));
                    return Err(e);
                }
            };

            if calls.is_empty() {
                if !content.is_empty() {
                    conversation.push(Message {
                        role: Role::Assistant,
                        content,
                    });
                }
                on_event(ChatEvent::Usage(total_usage.clone()));
                on_event(ChatEvent::Done);
                return Ok(total_usage);
            }

            for call in &calls {
                on_event(ChatEvent::ToolStart {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
            }
            let outcomes = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcomes = self.run_tools(&calls) => Some(outcomes),
            };
            let Some(outcomes) = outcomes else {
                on_event(ChatEvent::Cancelled);
                return Err(QuillError::Cancelled);
            };
            let results = calls
                .iter()
                .zip(outcomes)
                .map(|(call, outcome)| {
                    let (text, is_error) = match outcome {
                        Ok(output) => (output.text_content(), output.is_error),
                        Err(e) => {
                            tracing::warn!("Tool '{}' failed: {e}", call.name);
                            (e.to_string(), true)
                        }
                    };
                    on_event(ChatEvent::ToolEnd {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        output: text.clone(),
                        is_error,
                    });
                    ContentBlock::ToolResult {
                        tool_use_id: call.id.clone(),
                        content: vec![ToolResultContent::Text { text }],
                        is_error: is_error.then_some(true),
                    }
                })
                .collect();

            conversation.push(Message {
                role: Role::Assistant,
                content,
            });
            conversation.push(Message {
                role: Role::Tool,
                content: results,
            });
        }

        let err = QuillError::Other(format!(
            "Stopped after {} tool rounds without a final answer",
            self.max_tool_loops
        ));
        on_event(ChatEvent::Error(err.to_string()));
        Err(err)
    }

    /// Stream one model response, forwarding text as it arrives.
    async fn stream_response<F>(
        &self,
        conversation: &Conversation,
        cancel: &CancellationToken,
        on_event: &mut F,
        total_usage: &mut Usage,
    ) -> Result<(Vec<ContentBlock>, Vec<ToolCallDirective>), QuillError>
    where
        F: FnMut(ChatEvent),
    {
        let definitions = self.registry.definitions();
        let request = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: conversation.messages().to_vec(),
            system: self.system_prompt.clone(),
            tools: if definitions.is_empty() {
                None
            } else {
                Some(definitions)
            },
            stop_sequences: None,
            temperature: None,
            stream: true,
        };

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QuillError::Cancelled),
            stream = self.provider.create_message_stream(&request) => stream?,
        };

        let mut assembler = TurnAssembler::new();
        let mut calls = Vec::new();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QuillError::Cancelled),
                event = stream.next() => event,
            };
            let turn_event = match event {
                Some(event) => assembler.push(event?)?,
                None => assembler.finish(),
            };
            match turn_event {
                Some(TurnEvent::TextFragment(text)) => on_event(ChatEvent::TextDelta(text)),
                Some(TurnEvent::ToolCall(call)) => calls.push(call),
                Some(TurnEvent::TurnComplete { stop_reason, usage }) => {
                    tracing::debug!(?stop_reason, "Model response complete");
                    total_usage.add(&usage);
                    break;
                }
                None if assembler.is_complete() => break,
                None => {}
            }
        }

        Ok((assembler.into_content(), calls))
    }

    /// Run all tool calls of one response concurrently; outcomes keep call order.
    async fn run_tools(
        &self,
        calls: &[ToolCallDirective],
    ) -> Vec<Result<ToolOutput, ToolError>> {
        join_all(calls.iter().map(|call| {
            self.registry
                .execute(&call.name, call.input.clone(), ToolContext::new())
        }))
        .await
    }
}
