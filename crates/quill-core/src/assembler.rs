//! Folds the provider's raw stream events into turn-level events.

use std::collections::BTreeMap;

use quill_types::{ApiError, ContentBlock, ContentDelta, StopReason, StreamEvent, Usage};

/// What the model produced, at the granularity the orchestrator acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Display text, emitted as soon as it arrives.
    TextFragment(String),
    /// A fully-assembled tool call. Emitted when its block closes.
    ToolCall(ToolCallDirective),
    /// The model finished this response.
    TurnComplete {
        stop_reason: Option<StopReason>,
        usage: Usage,
    },
}

/// A request from the model to run one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDirective {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

enum OpenBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
}

/// Incremental assembler for one streamed model response.
///
/// Feed every [`StreamEvent`] to [`push`](Self::push); the finished assistant
/// content is available from [`content`](Self::content) afterwards.
#[derive(Default)]
pub struct TurnAssembler {
    open: BTreeMap<usize, OpenBlock>,
    content: Vec<ContentBlock>,
    model: Option<String>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    complete: bool,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one stream event. Returns the turn event it completes, if any.
    pub fn push(&mut self, event: StreamEvent) -> Result<Option<TurnEvent>, ApiError> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.usage.add(&message.usage);
                self.model = Some(message.model);
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { text } => {
                    self.open.insert(index, OpenBlock::Text(text.clone()));
                    if !text.is_empty() {
                        return Ok(Some(TurnEvent::TextFragment(text)));
                    }
                }
                ContentBlock::ToolUse { id, name, .. } => {
                    self.open.insert(
                        index,
                        OpenBlock::ToolUse {
                            id,
                            name,
                            json: String::new(),
                        },
                    );
                }
                ContentBlock::ToolResult { .. } => {
                    tracing::debug!("Ignoring tool_result block {index} in model output");
                }
            },
            StreamEvent::ContentBlockDelta { index, delta } => {
                match (self.open.get_mut(&index), delta) {
                    (Some(OpenBlock::Text(buf)), ContentDelta::TextDelta { text }) => {
                        buf.push_str(&text);
                        return Ok(Some(TurnEvent::TextFragment(text)));
                    }
                    (Some(OpenBlock::ToolUse { json, .. }), ContentDelta::InputJsonDelta { partial_json }) => {
                        json.push_str(&partial_json);
                    }
                    // Deltas of skipped blocks (thinking and the like).
                    _ => {}
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                if let Some(block) = self.open.remove(&index) {
                    return Ok(self.close(block));
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    self.usage.add(&usage);
                }
            }
            StreamEvent::MessageStop => return Ok(Some(self.complete())),
            StreamEvent::Ping => {}
            StreamEvent::Error { error } => {
                return Err(match error.error_type.as_str() {
                    "overloaded_error" => ApiError::Overloaded,
                    _ => ApiError::Server {
                        status: 0,
                        message: format!("{}: {}", error.error_type, error.message),
                    },
                });
            }
        }
        Ok(None)
    }

    /// Close out a stream that ended without `message_stop`.
    ///
    /// Open text blocks are kept; half-received tool calls are dropped since
    /// their arguments cannot be trusted. Returns `None` if the turn already
    /// completed.
    pub fn finish(&mut self) -> Option<TurnEvent> {
        if self.complete {
            return None;
        }
        for (index, block) in std::mem::take(&mut self.open) {
            match block {
                OpenBlock::Text(text) if !text.is_empty() => {
                    self.content.push(ContentBlock::Text { text });
                }
                OpenBlock::ToolUse { name, .. } => {
                    tracing::warn!("Stream ended inside tool call '{name}' (block {index})");
                }
                OpenBlock::Text(_) => {}
            }
        }
        Some(self.complete())
    }

    /// The assistant content assembled so far, in completion order.
    pub fn content(&self) -> &[ContentBlock] {
        &self.content
    }

    pub fn into_content(self) -> Vec<ContentBlock> {
        self.content
    }

    /// Model name announced in `message_start`.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Concatenated text of all closed text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn close(&mut self, block: OpenBlock) -> Option<TurnEvent> {
        match block {
            OpenBlock::Text(text) => {
                if !text.is_empty() {
                    self.content.push(ContentBlock::Text { text });
                }
                None
            }
            OpenBlock::ToolUse { id, name, json } => {
                let input = parse_tool_input(&name, &json);
                self.content.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
                Some(TurnEvent::ToolCall(ToolCallDirective { id, name, input }))
            }
        }
    }

    fn complete(&mut self) -> TurnEvent {
        self.complete = true;
        TurnEvent::TurnComplete {
            stop_reason: self.stop_reason,
            usage: self.usage.clone(),
        }
    }
}

/// Tool arguments arrive as JSON fragments; an empty buffer means `{}`.
///
/// Unparseable arguments become `{}` so schema validation rejects the call
/// and the model sees why.
fn parse_tool_input(name: &str, json: &str) -> serde_json::Value {
    if json.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(json) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Malformed arguments for tool '{name}': {e}");
            serde_json::json!({})
        }
    }
}
