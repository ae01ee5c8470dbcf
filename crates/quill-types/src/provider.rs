//! Provider trait for the chat-completion service.

use crate::{ApiError, BoxFuture, CreateMessageRequest, StreamEvent};
use futures_core::Stream;
use std::pin::Pin;

/// A boxed async stream of events from a completion provider.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ApiError>> + Send>>;

/// A streaming chat-completion service.
///
/// Dyn-compatible so the orchestrator and the sampling handler can share one
/// `Arc<dyn Provider>`.
pub trait Provider: Send + Sync {
    /// Send a streaming request, returning a stream of canonical events.
    fn create_message_stream<'a>(
        &'a self,
        request: &'a CreateMessageRequest,
    ) -> BoxFuture<'a, Result<EventStream, ApiError>>;

    /// Provider name for logging/display (e.g., "anthropic").
    fn name(&self) -> &str;
}
