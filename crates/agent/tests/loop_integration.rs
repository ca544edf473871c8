//! End-to-end tests of the agent loop with a scripted provider.
//!
//! Each test drives `Agent::run_stream` against canned LLM streams and
//! asserts on the emitted event sequence and the persisted session state.

use async_trait::async_trait;
use oxbow_agent::{Agent, AgentRequest, ConfirmationBroker, PromptManager, Tool, ToolOutput, ToolRegistry};
use oxbow_config::AppConfig;
use oxbow_core::error::{ProviderError, ToolError};
use oxbow_core::event::{StreamEvent, StreamStatus};
use oxbow_core::message::Role;
use oxbow_core::provider::{ChatRequest, ChatResponse, Choice, ChoiceMessage, Provider};
use oxbow_memory::{JsonlVectorStore, SessionStore};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

const DENIED_RESULT: &str = "User denied the execution of this tool.";

/// A provider that replays canned NDJSON streams, one per iteration, and
/// answers validation calls with a fixed reply.
struct ScriptedProvider {
    streams: Mutex<VecDeque<Vec<String>>>,
    validation_answer: String,
}

impl ScriptedProvider {
    fn new(streams: Vec<Vec<String>>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            validation_answer: "yes".into(),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn call(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            choices: vec![Choice {
                message: ChoiceMessage {
                    role: Role::Assistant,
                    content: self.validation_answer.clone(),
                    tool_calls: vec![],
                },
                finish_reason: Some("stop".into()),
            }],
        })
    }

    async fn stream_call(
        &self,
        _request: ChatRequest,
        sink: mpsc::Sender<String>,
    ) -> Result<(), ProviderError> {
        let frames = self
            .streams
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| vec![text_frame("script exhausted")]);
        for frame in frames {
            if sink.send(frame).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(vec![0.0; 8])
    }
}

fn text_frame(text: &str) -> String {
    serde_json::json!({"message": {"role": "assistant", "content": text}, "done": false})
        .to_string()
}

fn tool_call_frame(name: &str, args: serde_json::Value) -> String {
    serde_json::json!({
        "message": {
            "role": "assistant",
            "content": "",
            "tool_calls": [{"function": {"name": name, "arguments": args}}],
        },
        "done": false,
    })
    .to_string()
}

fn done_frame() -> String {
    serde_json::json!({"done": true}).to_string()
}

fn text_stream(text: &str) -> Vec<String> {
    vec![text_frame(text), done_frame()]
}

fn tool_stream(name: &str, args: serde_json::Value) -> Vec<String> {
    vec![tool_call_frame(name, args), done_frame()]
}

/// A mock search tool that streams two output lines.
struct MockSearchTool {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for MockSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }
    fn description(&self) -> &str {
        "Mock search"
    }
    fn schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}})
    }
    async fn execute(
        &self,
        _ctx: CancellationToken,
        args_json: &str,
        _session_id: &str,
        _agent: &Agent,
        output: &ToolOutput,
    ) -> Result<String, ToolError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let args: serde_json::Value = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        output
            .write_line(format!("searching: {}", args["query"].as_str().unwrap_or("")))
            .await;
        output.write_line("1 result found").await;
        Ok("Tokyo population: about 14 million".into())
    }
}

/// A sensitive mock tool; executions are counted so denial can assert zero.
struct MockWriteTool {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for MockWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Mock file write"
    }
    fn schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}})
    }
    fn is_sensitive(&self) -> bool {
        true
    }
    async fn execute(
        &self,
        _ctx: CancellationToken,
        _args_json: &str,
        _session_id: &str,
        _agent: &Agent,
        output: &ToolOutput,
    ) -> Result<String, ToolError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        output.write_line("writing file").await;
        Ok("written".into())
    }
}

struct Harness {
    agent: Arc<Agent>,
    broker: Arc<ConfirmationBroker>,
    store: Arc<SessionStore>,
    _dir: tempfile::TempDir,
}

async fn harness(
    provider: ScriptedProvider,
    register: impl FnOnce(&mut ToolRegistry),
    max_iterations: u32,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();

    let mut config = AppConfig::default();
    config.agent.max_iterations = max_iterations;
    config
        .tool_validation
        .keywords
        .insert("write_file".into(), vec!["write".into(), "file".into()]);

    let mut registry = ToolRegistry::new();
    register(&mut registry);

    let store = Arc::new(SessionStore::open(dir.path().join("memory")).await.unwrap());
    let vectors = Arc::new(JsonlVectorStore::open(None).await.unwrap());
    let broker = Arc::new(ConfirmationBroker::new());
    let prompts = Arc::new(PromptManager::new("/nonexistent/prompts"));

    let agent = Arc::new(Agent::new(
        Arc::new(provider),
        Arc::new(registry),
        store.clone(),
        vectors,
        broker.clone(),
        prompts,
        &config,
    ));

    Harness {
        agent,
        broker,
        store,
        _dir: dir,
    }
}

/// Run a request to completion, resolving any confirmation with `approve`,
/// and return every emitted event in order.
async fn run_collect(h: &Harness, request: AgentRequest, approve: Option<bool>) -> Vec<StreamEvent> {
    let (tx, mut rx) = mpsc::channel(256);
    let agent = h.agent.clone();
    let ctx = CancellationToken::new();
    let task = tokio::spawn(async move { agent.run_stream(ctx, request, tx).await });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        if let StreamEvent::AwaitingConfirmation {
            confirmation_id, ..
        } = &event
        {
            if let Some(allowed) = approve {
                h.broker.resolve(confirmation_id, allowed).await;
            }
        }
        events.push(event);
    }
    task.await.unwrap();
    events
}

fn type_names(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}

fn assert_single_terminal_complete(events: &[StreamEvent]) {
    let completes = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                StreamEvent::Status {
                    status: StreamStatus::StreamComplete
                }
            )
        })
        .count();
    assert_eq!(completes, 1, "expected exactly one stream_complete");
    assert!(
        matches!(
            events.last(),
            Some(StreamEvent::Status {
                status: StreamStatus::StreamComplete
            })
        ),
        "stream_complete must be the last event, got {:?}",
        type_names(events)
    );
}

// --- Scenario 1: greeting shortcut ---

#[tokio::test]
async fn greeting_never_triggers_tools() {
    let executions = Arc::new(AtomicUsize::new(0));
    let provider = ScriptedProvider::new(vec![
        // the model hallucinates a search for a bare greeting
        tool_stream("web_search", serde_json::json!({"query": "greeting"})),
        text_stream("Hello! How can I help you today?"),
    ]);

    let counter = executions.clone();
    let h = harness(
        provider,
        move |r| {
            r.register(Arc::new(MockSearchTool { executions: counter }));
        },
        6,
    )
    .await;

    let events = run_collect(&h, AgentRequest::new("hello"), None).await;

    assert_single_terminal_complete(&events);
    assert!(
        !events.iter().any(|e| matches!(e, StreamEvent::ToolStart { .. })),
        "no tool may start for a greeting: {:?}",
        type_names(&events)
    );
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    let answer = events.iter().find_map(|e| match e {
        StreamEvent::Token { text } => Some(text.clone()),
        _ => None,
    });
    assert_eq!(answer.as_deref(), Some("Hello! How can I help you today?"));
}

// --- Scenario 2: one successful tool ---

#[tokio::test]
async fn single_tool_round_trip() {
    let executions = Arc::new(AtomicUsize::new(0));
    let provider = ScriptedProvider::new(vec![
        tool_stream("web_search", serde_json::json!({"query": "population of Tokyo"})),
        text_stream("Approximately 14 million."),
    ]);

    let counter = executions.clone();
    let h = harness(
        provider,
        move |r| {
            r.register(Arc::new(MockSearchTool { executions: counter }));
        },
        6,
    )
    .await;

    let events = run_collect(&h, AgentRequest::new("search for population of Tokyo"), None).await;

    assert_single_terminal_complete(&events);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let start = events
        .iter()
        .position(|e| matches!(e, StreamEvent::ToolStart { tool_name, .. } if tool_name == "web_search"))
        .expect("tool_start missing");
    let end = events
        .iter()
        .position(|e| matches!(e, StreamEvent::ToolEnd { tool_name, .. } if tool_name == "web_search"))
        .expect("tool_end missing");
    assert!(start < end);

    let outputs: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            StreamEvent::ToolOutput { tool_name, .. } if tool_name == "web_search" => Some(i),
            _ => None,
        })
        .collect();
    assert!(!outputs.is_empty(), "at least one tool_output expected");
    assert!(outputs.iter().all(|&i| start < i && i < end),
        "every tool_output must fall inside its bracket");

    let answer = events.iter().find_map(|e| match e {
        StreamEvent::Token { text } => Some(text.clone()),
        _ => None,
    });
    assert_eq!(answer.as_deref(), Some("Approximately 14 million."));

    // the tool result was fed back into the session; close() drains the
    // write queue so the read is deterministic
    h.store.close().await;
    let session_id = h.store.current_session_id().await;
    let messages = h.store.get_session_messages(&session_id).await.unwrap();
    assert!(messages.iter().any(|m| m.role == Role::Tool
        && m.content.contains("14 million")
        && m.name.as_deref() == Some("web_search")));
}

// --- Scenario 3: sensitive tool approved ---

#[tokio::test]
async fn sensitive_tool_approved() {
    let executions = Arc::new(AtomicUsize::new(0));
    let provider = ScriptedProvider::new(vec![
        tool_stream("write_file", serde_json::json!({"path": "hello.txt", "content": "hi"})),
        text_stream("File written."),
    ]);

    let counter = executions.clone();
    let h = harness(
        provider,
        move |r| {
            r.register(Arc::new(MockWriteTool { executions: counter }));
        },
        6,
    )
    .await;

    let events = run_collect(
        &h,
        AgentRequest::new("write hello.txt with content hi"),
        Some(true),
    )
    .await;

    assert_single_terminal_complete(&events);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let awaiting = events
        .iter()
        .position(|e| matches!(e, StreamEvent::AwaitingConfirmation { tool_name, .. } if tool_name == "write_file"))
        .expect("awaiting_confirmation missing");
    let start = events
        .iter()
        .position(|e| matches!(e, StreamEvent::ToolStart { tool_name, .. } if tool_name == "write_file"))
        .expect("tool_start missing after approval");
    let end = events
        .iter()
        .position(|e| matches!(e, StreamEvent::ToolEnd { tool_name, .. } if tool_name == "write_file"))
        .expect("tool_end missing after approval");
    assert!(awaiting < start && start < end);
}

// --- Scenario 4: sensitive tool denied ---

#[tokio::test]
async fn sensitive_tool_denied() {
    let executions = Arc::new(AtomicUsize::new(0));
    let provider = ScriptedProvider::new(vec![
        tool_stream("write_file", serde_json::json!({"path": "hello.txt", "content": "hi"})),
        text_stream("Understood, I won't write the file."),
    ]);

    let counter = executions.clone();
    let h = harness(
        provider,
        move |r| {
            r.register(Arc::new(MockWriteTool { executions: counter }));
        },
        6,
    )
    .await;

    let events = run_collect(
        &h,
        AgentRequest::new("write hello.txt with content hi"),
        Some(false),
    )
    .await;

    assert_single_terminal_complete(&events);
    assert_eq!(executions.load(Ordering::SeqCst), 0, "denied tool must not run");

    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::AwaitingConfirmation { .. })));
    assert!(
        !events.iter().any(|e| matches!(
            e,
            StreamEvent::ToolOutput { tool_name, .. } if tool_name == "write_file"
        )),
        "no tool_output for a denied tool"
    );
    assert!(
        !events.iter().any(|e| matches!(
            e,
            StreamEvent::ToolStart { tool_name, .. } if tool_name == "write_file"
        )),
        "no bracket for a denied tool"
    );

    // the denial text is fed back to the model as the tool result
    h.store.close().await;
    let session_id = h.store.current_session_id().await;
    let messages = h.store.get_session_messages(&session_id).await.unwrap();
    assert!(messages
        .iter()
        .any(|m| m.role == Role::Tool && m.content == DENIED_RESULT));
}

// --- Scenario 5: duplicate tool call ---

#[tokio::test]
async fn duplicate_tool_call_suppressed() {
    let executions = Arc::new(AtomicUsize::new(0));
    let args = serde_json::json!({"query": "population of Tokyo"});
    let provider = ScriptedProvider::new(vec![
        tool_stream("web_search", args.clone()),
        tool_stream("web_search", args), // identical call again
        text_stream("About 14 million people live in Tokyo."),
    ]);

    let counter = executions.clone();
    let h = harness(
        provider,
        move |r| {
            r.register(Arc::new(MockSearchTool { executions: counter }));
        },
        6,
    )
    .await;

    let events = run_collect(&h, AgentRequest::new("search for population of Tokyo"), None).await;

    assert_single_terminal_complete(&events);
    assert_eq!(
        executions.load(Ordering::SeqCst),
        1,
        "the duplicate call must not execute a second time"
    );

    let answer = events.iter().find_map(|e| match e {
        StreamEvent::Token { text } => Some(text.clone()),
        _ => None,
    });
    assert!(answer.is_some());

    // a synthetic user message redirected the model
    h.store.close().await;
    let session_id = h.store.current_session_id().await;
    let messages = h.store.get_session_messages(&session_id).await.unwrap();
    assert!(messages
        .iter()
        .any(|m| m.role == Role::User && m.content.contains("identical arguments")));
}

// --- Scenario 6: iteration exhaustion ---

#[tokio::test]
async fn iteration_limit_reached() {
    let executions = Arc::new(AtomicUsize::new(0));
    // a model that only ever wants tools, with distinct arguments each time
    let streams = (0..5)
        .map(|i| tool_stream("web_search", serde_json::json!({"query": format!("search {i}")})))
        .collect();
    let provider = ScriptedProvider::new(streams);

    let counter = executions.clone();
    let h = harness(
        provider,
        move |r| {
            r.register(Arc::new(MockSearchTool { executions: counter }));
        },
        3,
    )
    .await;

    let events = run_collect(&h, AgentRequest::new("search for everything"), None).await;

    assert_single_terminal_complete(&events);
    assert_eq!(executions.load(Ordering::SeqCst), 3, "one execution per iteration");

    let error = events.iter().find_map(|e| match e {
        StreamEvent::Error { message } => Some(message.clone()),
        _ => None,
    });
    assert_eq!(error.as_deref(), Some("Iteration limit reached."));
    assert!(
        !events.iter().any(|e| matches!(e, StreamEvent::Token { .. })),
        "no final answer on exhaustion"
    );
}

// --- unknown tool is not fatal ---

#[tokio::test]
async fn unknown_tool_feeds_error_back() {
    let provider = ScriptedProvider::new(vec![
        tool_stream("web_search", serde_json::json!({"query": "something"})),
        text_stream("I could not use that tool."),
    ]);

    // registry left empty: web_search is configured for validation but not
    // registered, so execution reports an unknown tool
    let h = harness(provider, |_r| {}, 6).await;

    let events = run_collect(&h, AgentRequest::new("search for something"), None).await;

    assert_single_terminal_complete(&events);

    h.store.close().await;
    let session_id = h.store.current_session_id().await;
    let messages = h.store.get_session_messages(&session_id).await.unwrap();
    assert!(messages
        .iter()
        .any(|m| m.role == Role::Tool && m.content == "unknown tool: web_search"));

    // the loop recovered with a prose answer
    assert!(events.iter().any(|e| matches!(e, StreamEvent::Token { .. })));
}

// --- cancellation still terminates the stream cleanly ---

#[tokio::test]
async fn cancellation_emits_terminal_status() {
    let provider = ScriptedProvider::new(vec![text_stream("never consumed")]);
    let h = harness(provider, |_r| {}, 6).await;

    let (tx, mut rx) = mpsc::channel(256);
    let agent = h.agent.clone();
    let ctx = CancellationToken::new();
    ctx.cancel();
    let task = tokio::spawn(async move {
        agent
            .run_stream(ctx, AgentRequest::new("anything"), tx)
            .await
    });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    task.await.unwrap();

    assert_single_terminal_complete(&events);
}

// --- session reuse across requests ---

#[tokio::test]
async fn session_history_accumulates_across_requests() {
    let provider = ScriptedProvider::new(vec![
        text_stream("First answer."),
        text_stream("Second answer."),
    ]);
    let h = harness(provider, |_r| {}, 6).await;

    run_collect(&h, AgentRequest::new("first question"), None).await;
    // drain the writer so the second request sees the full history; later
    // writes apply inline once the store is closed
    h.store.close().await;
    let session_id = h.store.current_session_id().await;

    run_collect(&h, AgentRequest::new("second question"), None).await;
    assert_eq!(h.store.current_session_id().await, session_id);

    let messages = h.store.get_session_messages(&session_id).await.unwrap();
    let user_turns = messages.iter().filter(|m| m.role == Role::User).count();
    let assistant_turns = messages.iter().filter(|m| m.role == Role::Assistant).count();
    assert_eq!(user_turns, 2);
    assert_eq!(assistant_turns, 2);
    // the system prompt was seeded exactly once
    assert_eq!(messages.iter().filter(|m| m.role == Role::System).count(), 1);
}
