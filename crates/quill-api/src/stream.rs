//! Async stream that converts SSE events into typed StreamEvents.

use crate::sse::SseParser;
use futures_core::Stream;
use pin_project_lite::pin_project;
use quill_types::{
    ApiError, ApiErrorResponse, ContentBlock, ContentDelta, CreateMessageResponse, MessageDelta,
    StreamEvent, Usage,
};
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

pin_project! {
    /// An async stream of typed [`StreamEvent`]s from the Anthropic Messages API.
    ///
    /// One network chunk may carry several events; they are queued and
    /// yielded in order.
    pub struct MessageStream {
        #[pin]
        inner: ByteStream,
        parser: SseParser,
        // Bytes of a UTF-8 sequence split across chunks.
        carry: Vec<u8>,
        ready: VecDeque<Result<StreamEvent, ApiError>>,
    }
}

impl MessageStream {
    /// Create a new MessageStream from a reqwest byte stream.
    pub fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            carry: Vec::new(),
            ready: VecDeque::new(),
        }
    }
}

impl Stream for MessageStream {
    type Item = Result<StreamEvent, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(event));
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.carry.extend_from_slice(&bytes);
                    let valid = match std::str::from_utf8(this.carry) {
                        Ok(text) => text.len(),
                        Err(e) => e.valid_up_to(),
                    };
                    let text = String::from_utf8_lossy(&this.carry[..valid]).into_owned();
                    this.carry.drain(..valid);

                    for sse in this.parser.feed(&text) {
                        match parse_stream_event(sse.event_type.as_deref(), &sse.data) {
                            Ok(Some(event)) => this.ready.push_back(Ok(event)),
                            Ok(None) => {}
                            Err(e) => this.ready.push_back(Err(e)),
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ApiError::Network(e.to_string()))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// The JSON payload of each SSE event, discriminated by its `type` field.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: CreateMessageResponse,
    },
    ContentBlockStart {
        index: usize,
        content_block: serde_json::Value,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiErrorResponse,
    },
}

/// Parse one SSE event into a typed StreamEvent. `Ok(None)` for events Quill skips.
pub(crate) fn parse_stream_event(
    event_type: Option<&str>,
    data: &str,
) -> Result<Option<StreamEvent>, ApiError> {
    let Some(event_type) = event_type else {
        return Ok(None);
    };
    const KNOWN: &[&str] = &[
        "message_start",
        "content_block_start",
        "content_block_delta",
        "content_block_stop",
        "message_delta",
        "message_stop",
        "ping",
        "error",
    ];
    if !KNOWN.contains(&event_type) {
        tracing::debug!("Unknown SSE event type: {event_type}");
        return Ok(None);
    }

    let wire: WireEvent = serde_json::from_str(data)
        .map_err(|e| ApiError::StreamParse(format!("{event_type}: {e}")))?;

    let event = match wire {
        WireEvent::MessageStart { message } => StreamEvent::MessageStart { message },
        WireEvent::ContentBlockStart {
            index,
            content_block,
        } => match serde_json::from_value::<ContentBlock>(content_block) {
            Ok(content_block) => StreamEvent::ContentBlockStart {
                index,
                content_block,
            },
            Err(e) => {
                tracing::debug!("Skipping unsupported content block {index}: {e}");
                return Ok(None);
            }
        },
        WireEvent::ContentBlockDelta { index, delta } => {
            StreamEvent::ContentBlockDelta { index, delta }
        }
        WireEvent::ContentBlockStop { index } => StreamEvent::ContentBlockStop { index },
        WireEvent::MessageDelta { delta, usage } => StreamEvent::MessageDelta { delta, usage },
        WireEvent::MessageStop => StreamEvent::MessageStop,
        WireEvent::Ping => StreamEvent::Ping,
        WireEvent::Error { error } => StreamEvent::Error { error },
    };
    Ok(Some(event))
}
