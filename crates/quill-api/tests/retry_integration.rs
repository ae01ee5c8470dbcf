//! Retry/backoff behaviour of `ApiClient` against a scripted local HTTP server.
//!
//! Each accepted connection is answered with the next canned response, so
//! the connection count equals the number of attempts the client made.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::StreamExt;
use quill_api::{ApiClient, MessageStream, RetryConfig};
use quill_types::{ApiError, CreateMessageRequest, Message, StreamEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const SSE_BODY: &str = "\
event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_retry\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"test\",\"stop_reason\":null,\"usage\":{\"input_tokens\":10,\"output_tokens\":0}}}\n\
\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\
\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"second time lucky\"}}\n\
\n\
event: content_block_stop\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\
\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":4}}\n\
\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\
\n";

fn error_response(status_line: &str, message: &str, extra_headers: &str) -> String {
    let body = format!(r#"{{"error":{{"message":"{message}"}}}}"#);
    format!(
        "HTTP/1.1 {status_line}\r\n\
         Content-Type: application/json\r\n\
         {extra_headers}\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
    )
}

fn rate_limited() -> String {
    error_response("429 Too Many Requests", "slow down", "Retry-After: 0.01\r\n")
}

fn server_error() -> String {
    error_response("500 Internal Server Error", "kaput", "")
}

fn unauthorized() -> String {
    error_response("401 Unauthorized", "invalid api key", "")
}

fn sse_ok() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/event-stream\r\n\
         Connection: close\r\n\
         \r\n\
         {SSE_BODY}"
    )
}

/// Serve `responses` in order, one per connection. Returns the base URL and
/// a counter of accepted connections.
async fn start_test_server(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    let responses = Arc::new(responses);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let idx = counter.fetch_add(1, Ordering::SeqCst);
            let responses = Arc::clone(&responses);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                let _ = socket.read(&mut buf).await;
                if let Some(response) = responses.get(idx) {
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.flush().await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}"), accepted)
}

fn fast_client(base_url: &str) -> ApiClient {
    ApiClient::new("test-key", base_url)
        .unwrap()
        .with_retry_config(RetryConfig {
            max_retries: 2,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_factor: 2.0,
        })
}

fn request() -> CreateMessageRequest {
    CreateMessageRequest {
        model: "test-model".into(),
        max_tokens: 64,
        messages: vec![Message::user("hello")],
        system: None,
        tools: None,
        stop_sequences: None,
        temperature: None,
        stream: true,
    }
}

async fn collect(mut stream: MessageStream) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event.expect("event should parse"));
    }
    events
}

#[tokio::test]
async fn rate_limit_then_success_is_transparent() {
    let (url, accepted) = start_test_server(vec![rate_limited(), sse_ok()]).await;

    let stream = fast_client(&url)
        .create_message_stream(&request())
        .await
        .expect("should succeed after one retry");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    let events = collect(stream).await;
    assert!(matches!(events.first(), Some(StreamEvent::MessageStart { .. })));
    assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));
}

#[tokio::test]
async fn server_error_is_retried() {
    let (url, accepted) = start_test_server(vec![server_error(), sse_ok()]).await;

    let result = fast_client(&url).create_message_stream(&request()).await;
    assert!(result.is_ok(), "{:?}", result.err());
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_error() {
    let (url, accepted) =
        start_test_server(vec![rate_limited(), rate_limited(), rate_limited()]).await;

    match fast_client(&url).create_message_stream(&request()).await {
        Err(ApiError::RateLimited { retry_after_ms }) => assert_eq!(retry_after_ms, Some(10)),
        Err(other) => panic!("expected RateLimited, got {other:?}"),
        Ok(_) => panic!("expected an error"),
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let (url, accepted) = start_test_server(vec![unauthorized(), sse_ok()]).await;

    match fast_client(&url).create_message_stream(&request()).await {
        Err(ApiError::Auth { message }) => assert_eq!(message, "invalid api key"),
        Err(other) => panic!("expected Auth, got {other:?}"),
        Ok(_) => panic!("expected an error"),
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retries_disabled_fail_fast() {
    let (url, accepted) = start_test_server(vec![server_error(), sse_ok()]).await;

    let client = ApiClient::new("test-key", &url)
        .unwrap()
        .with_retry_config(RetryConfig::none());
    match client.create_message_stream(&request()).await {
        Err(ApiError::Server { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "kaput");
        }
        Err(other) => panic!("expected Server, got {other:?}"),
        Ok(_) => panic!("expected an error"),
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}
