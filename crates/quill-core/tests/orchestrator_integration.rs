//! The tool loop end to end: scripted model responses, real tools, and a
//! real MCP connection for the remote case.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use quill_core::{ChatEvent, Orchestrator, ProviderSampler};
use quill_mcp::{ClientOptions, McpClient, McpServer, McpTool, PeerOptions};
use quill_store::RecordStore;
use quill_tools::{SummarizeRecordsTool, ToolRegistry, record_tools};
use quill_types::{
    ApiError, BoxFuture, ContentBlock, ContentDelta, Conversation, CreateMessageRequest,
    CreateMessageResponse, MessageDelta, QuillError, Role, StopReason, StreamEvent, Tool,
    ToolContext, ToolDefinition, ToolError, ToolOutput, ToolResultContent, Usage,
    provider::{EventStream, Provider},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Replays one scripted response per request and records every request.
#[derive(Default)]
struct ScriptedProvider {
    responses: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<CreateMessageRequest>>,
    /// Answer with this response once the script runs out.
    fallback: Option<Vec<StreamEvent>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<CreateMessageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Provider for ScriptedProvider {
    fn create_message_stream<'a>(
        &'a self,
        request: &'a CreateMessageRequest,
    ) -> BoxFuture<'a, Result<EventStream, ApiError>> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone());
        let result = match next {
            Some(events) => {
                let stream = futures_util::stream::iter(events.into_iter().map(Ok::<_, ApiError>));
                Ok(Box::pin(stream) as EventStream)
            }
            None => Err(ApiError::BadRequest {
                message: "script exhausted".into(),
            }),
        };
        Box::pin(async move { result })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn message_start() -> StreamEvent {
    StreamEvent::MessageStart {
        message: CreateMessageResponse {
            id: "msg".into(),
            model: "claude-test".into(),
            stop_reason: None,
            usage: Usage {
                input_tokens: 5,
                output_tokens: 0,
            },
        },
    }
}

fn finish(reason: StopReason) -> Vec<StreamEvent> {
    vec![
        StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(reason),
            },
            usage: Some(Usage {
                input_tokens: 0,
                output_tokens: 3,
            }),
        },
        StreamEvent::MessageStop,
    ]
}

fn text_reply(text: &str) -> Vec<StreamEvent> {
    let mut events = vec![
        message_start(),
        StreamEvent::ContentBlockStart {
            index: 0,
            content_block: ContentBlock::Text {
                text: String::new(),
            },
        },
        StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta { text: text.into() },
        },
        StreamEvent::ContentBlockStop { index: 0 },
    ];
    events.extend(finish(StopReason::EndTurn));
    events
}

/// A response that calls each `(id, name, input)` in order.
fn tool_calls(calls: &[(&str, &str, Value)]) -> Vec<StreamEvent> {
    let mut events = vec![message_start()];
    for (index, (id, name, input)) in calls.iter().enumerate() {
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::ToolUse {
                id: (*id).into(),
                name: (*name).into(),
                input: json!({}),
            },
        });
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::InputJsonDelta {
                partial_json: input.to_string(),
            },
        });
        events.push(StreamEvent::ContentBlockStop { index });
    }
    events.extend(finish(StopReason::ToolUse));
    events
}

fn tool_results(conversation: &Conversation, at: usize) -> Vec<(String, String, bool)> {
    let message = &conversation.messages()[at];
    assert_eq!(message.role, Role::Tool);
    message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let ToolResultContent::Text { text } = &content[0];
                (tool_use_id.clone(), text.clone(), is_error.unwrap_or(false))
            }
            other => panic!("expected tool result, got {other:?}"),
        })
        .collect()
}

async fn store_registry(dir: &TempDir) -> (Arc<RecordStore>, ToolRegistry) {
    let store = Arc::new(RecordStore::open(dir.path().join("notes.db")).await.unwrap());
    let mut registry = ToolRegistry::new();
    for tool in record_tools(Arc::clone(&store)) {
        registry.register(tool).unwrap();
    }
    (store, registry)
}

fn collect_events(into: Arc<Mutex<Vec<ChatEvent>>>) -> impl FnMut(ChatEvent) {
    move |event| into.lock().unwrap().push(event)
}

#[tokio::test]
async fn tool_call_then_final_answer() {
    let dir = TempDir::new().unwrap();
    let (store, registry) = store_registry(&dir).await;
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_calls(&[("t1", "create_record", json!({"content": "buy milk"}))]),
        text_reply("Saved it as record 1."),
    ]));
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(registry), "claude-test", 512);

    let events = Arc::new(Mutex::new(Vec::new()));
    let mut conversation = Conversation::new();
    let usage = orchestrator
        .run_turn(
            &mut conversation,
            "remember to buy milk",
            CancellationToken::new(),
            collect_events(events.clone()),
        )
        .await
        .unwrap();

    // Two model calls, each 5 in + 3 out.
    assert_eq!(
        usage,
        Usage {
            input_tokens: 10,
            output_tokens: 6
        }
    );

    let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    let results = tool_results(&conversation, 2);
    assert_eq!(results[0].0, "t1");
    assert!(!results[0].2);
    let record: Value = serde_json::from_str(&results[0].1).unwrap();
    assert_eq!(record["content"], "buy milk");
    assert_eq!(store.read(1).await.unwrap().unwrap().content, "buy milk");

    // The second request carries the tool result back to the model.
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.len(), 3);
    let tools: Vec<String> = requests[0]
        .tools
        .as_ref()
        .unwrap()
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert!(tools.contains(&"create_record".to_string()));

    let events = events.lock().unwrap();
    assert!(matches!(&events[0], ChatEvent::ToolStart { name, .. } if name == "create_record"));
    assert!(matches!(&events[1], ChatEvent::ToolEnd { is_error: false, .. }));
    assert!(events.contains(&ChatEvent::TextDelta("Saved it as record 1.".into())));
    assert_eq!(events.last(), Some(&ChatEvent::Done));
}

#[tokio::test]
async fn tool_failures_are_reported_to_the_model() {
    let dir = TempDir::new().unwrap();
    let (_store, registry) = store_registry(&dir).await;
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_calls(&[
            ("t1", "no_such_tool", json!({})),
            ("t2", "read_record", json!({"id": "seven"})),
            ("t3", "read_record", json!({"id": 9999})),
        ]),
        text_reply("Sorry, nothing there."),
    ]));
    let orchestrator = Orchestrator::new(provider, Arc::new(registry), "claude-test", 512);

    let mut conversation = Conversation::new();
    orchestrator
        .run_turn(
            &mut conversation,
            "read note seven",
            CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();

    let results = tool_results(&conversation, 2);
    assert_eq!(results.len(), 3);
    assert!(results[0].2);
    assert!(results[0].1.contains("Unknown tool: no_such_tool"));
    assert!(results[1].2);
    assert!(results[1].1.contains("Invalid arguments"));
    // A missing record is an ordinary answer, not a failure.
    assert_eq!(results[2], ("t3".into(), "Record 9999 not found".into(), false));
}

/// Sleeps for `ms` then answers with its own label.
struct Delay {
    name: &'static str,
    ms: u64,
}

impl Tool for Delay {
    fn name(&self) -> &str {
        self.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.into(),
            description: "Waits, then answers".into(),
            input_schema: json!({"type": "object"}),
        }
    }

    fn execute(&self, _input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(self.ms)).await;
            Ok(ToolOutput::text(self.name))
        })
    }
}

#[tokio::test]
async fn tool_calls_run_concurrently_and_keep_order() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Delay { name: "slow", ms: 300 })).unwrap();
    registry.register(Arc::new(Delay { name: "fast", ms: 10 })).unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_calls(&[
            ("a", "slow", json!({})),
            ("b", "fast", json!({})),
            ("c", "slow", json!({})),
        ]),
        text_reply("ok"),
    ]));
    let orchestrator = Orchestrator::new(provider, Arc::new(registry), "claude-test", 512);

    let mut conversation = Conversation::new();
    let started = Instant::now();
    orchestrator
        .run_turn(&mut conversation, "go", CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(550));

    let order: Vec<(String, String)> = tool_results(&conversation, 2)
        .into_iter()
        .map(|(id, text, _)| (id, text))
        .collect();
    assert_eq!(
        order,
        vec![
            ("a".into(), "slow".into()),
            ("b".into(), "fast".into()),
            ("c".into(), "slow".into())
        ]
    );
}

#[tokio::test]
async fn runaway_tool_loop_is_cut_off() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Delay { name: "again", ms: 0 })).unwrap();
    let provider = Arc::new(ScriptedProvider {
        fallback: Some(tool_calls(&[("x", "again", json!({}))])),
        ..ScriptedProvider::default()
    });
    let mut orchestrator = Orchestrator::new(provider.clone(), Arc::new(registry), "m", 64);
    orchestrator.set_max_tool_loops(3);

    let mut conversation = Conversation::new();
    let err = orchestrator
        .run_turn(&mut conversation, "loop", CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, QuillError::Other(msg) if msg.contains("3 tool rounds")));
    assert_eq!(provider.requests().len(), 3);
    // user + 3 × (assistant, tool results)
    assert_eq!(conversation.len(), 7);
}

#[tokio::test]
async fn provider_error_fails_the_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let orchestrator = Orchestrator::new(provider, Arc::new(ToolRegistry::new()), "m", 64);

    let events = Arc::new(Mutex::new(Vec::new()));
    let mut conversation = Conversation::new();
    let err = orchestrator
        .run_turn(
            &mut conversation,
            "hello",
            CancellationToken::new(),
            collect_events(events.clone()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QuillError::Api(ApiError::BadRequest { .. })));
    assert!(matches!(events.lock().unwrap().last(), Some(ChatEvent::Error(_))));
    assert_eq!(conversation.len(), 1);
}

#[tokio::test]
async fn remote_tools_and_sampling_over_mcp() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordStore::open(dir.path().join("notes.db")).await.unwrap());
    store.create("buy milk").await.unwrap();
    store.create("call the plumber").await.unwrap();

    let mut server_registry = ToolRegistry::new();
    for tool in record_tools(Arc::clone(&store)) {
        server_registry.register(tool).unwrap();
    }
    server_registry
        .register(Arc::new(SummarizeRecordsTool::new(Arc::clone(&store))))
        .unwrap();
    let server = McpServer::new("quill-server", Arc::new(server_registry));

    // Turn request, then the server's sampling request, then the final answer.
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_calls(&[("s1", "summarize_records", json!({}))]),
        text_reply("Groceries and a plumber."),
        text_reply("You need milk and a plumber."),
    ]));

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let _server_conn = server.serve(server_read, server_write);
    let (client_read, client_write) = tokio::io::split(client_io);
    let client = Arc::new(
        McpClient::connect_with_io(
            "notes",
            client_read,
            client_write,
            ClientOptions::with_sampler(Arc::new(ProviderSampler::new(
                provider.clone(),
                "claude-sampler",
            ))),
            PeerOptions::default(),
        )
        .await
        .unwrap(),
    );

    let mut registry = ToolRegistry::new();
    for tool in McpTool::all(&client) {
        registry.register(Arc::new(tool)).unwrap();
    }
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(registry), "claude-test", 512);

    let mut conversation = Conversation::new();
    orchestrator
        .run_turn(
            &mut conversation,
            "what's on my list?",
            CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();

    let results = tool_results(&conversation, 2);
    assert_eq!(results[0], ("s1".into(), "Groceries and a plumber.".into(), false));
    assert_eq!(
        conversation.last().map(|m| m.text()),
        Some("You need milk and a plumber.".to_string())
    );

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    let sampling = &requests[1];
    assert_eq!(sampling.model, "claude-sampler");
    assert!(sampling.tools.is_none());
    assert!(sampling.messages[0].text().contains("buy milk"));
}
