//! Streaming chat-completion client for Quill (Anthropic Messages API over SSE).

mod client;
mod provider;
mod retry;
mod sse;
mod stream;

pub use client::{ApiClient, DEFAULT_BASE_URL};
pub use provider::AnthropicProvider;
pub use retry::RetryConfig;
pub use stream::MessageStream;
