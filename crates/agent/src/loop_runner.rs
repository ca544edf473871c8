//! The agent reasoning loop.
//!
//! One `run_stream` call drives a full request: session resolution, the
//! bounded ReAct iteration cycle, tool fan-out, and event emission. The
//! agent itself is stateless between requests — everything durable lives in
//! the shared session store, and the collaborators (provider, registry,
//! broker, vector store, prompts) are process-wide, constructed once at
//! startup.

use oxbow_config::AppConfig;
use oxbow_core::event::{StreamEvent, StreamStatus};
use oxbow_core::message::{ChatMessage, ToolCall};
use oxbow_core::provider::{ChatRequest, Provider};
use oxbow_memory::{JsonlVectorStore, SessionStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::confirmation::ConfirmationBroker;
use crate::executor::execute_tool_call;
use crate::prompts::{PromptManager, DUPLICATE_TOOL_CALL, FORCE_TEXT_RESPONSE};
use crate::stream_parser::parse_stream;
use crate::tool::ToolRegistry;
use crate::validation::ToolValidator;

/// One request into the agent loop.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub prompt: String,

    /// Empty string: use the current session, or auto-create one.
    pub session_id: String,

    /// Opaque base64 image payloads.
    pub images: Vec<String>,

    /// Empty string: use the provider's default model.
    pub model: String,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// The core agent: orchestrates LLM streaming, validation, and tool
/// execution for one request at a time. Cheap to share behind an `Arc`.
pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    store: Arc<SessionStore>,
    vectors: Arc<JsonlVectorStore>,
    confirmations: Arc<ConfirmationBroker>,
    prompts: Arc<PromptManager>,
    validator: ToolValidator,
    max_iterations: u32,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        store: Arc<SessionStore>,
        vectors: Arc<JsonlVectorStore>,
        confirmations: Arc<ConfirmationBroker>,
        prompts: Arc<PromptManager>,
        config: &AppConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            vectors,
            confirmations,
            prompts,
            validator: ToolValidator::new(config.tool_validation.keywords.clone()),
            max_iterations: config.agent.max_iterations,
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn vectors(&self) -> &Arc<JsonlVectorStore> {
        &self.vectors
    }

    pub fn confirmations(&self) -> &Arc<ConfirmationBroker> {
        &self.confirmations
    }

    pub fn prompts(&self) -> &Arc<PromptManager> {
        &self.prompts
    }

    /// Process one request, streaming events to `events` until a final
    /// answer, an error, or cancellation. Always emits a terminal
    /// `status: stream_complete` as the last event.
    pub async fn run_stream(
        &self,
        ctx: CancellationToken,
        request: AgentRequest,
        events: mpsc::Sender<StreamEvent>,
    ) {
        self.run_inner(&ctx, request, &events).await;
        let _ = events
            .send(StreamEvent::Status {
                status: StreamStatus::StreamComplete,
            })
            .await;
    }

    async fn run_inner(
        &self,
        ctx: &CancellationToken,
        request: AgentRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) {
        let session_id = self.resolve_session(&request.session_id).await;
        info!(session_id = %session_id, prompt_len = request.prompt.len(), "Processing request");

        let mut history = self
            .store
            .get_session_messages(&session_id)
            .await
            .unwrap_or_default();

        if history.is_empty() {
            let system = ChatMessage::system(self.prompts.system_prompt().await);
            history.push(system.clone());
            self.store.append_message(&session_id, system).await;
        }

        self.store.add_conversation(request.prompt.clone()).await;
        let user_msg = ChatMessage::user_with_images(request.prompt.clone(), request.images.clone());
        history.push(user_msg.clone());
        self.store.append_message(&session_id, user_msg).await;

        let tools = self.registry.metadata();
        let mut previous_fingerprint: Option<String> = None;

        for iteration in 0..self.max_iterations {
            if ctx.is_cancelled() {
                return;
            }
            debug!(session_id = %session_id, iteration, "Agent loop iteration");
            let _ = events
                .send(StreamEvent::thinking("considering response"))
                .await;

            let mut chat_request =
                ChatRequest::new(history.clone()).with_model(request.model.clone());
            if !self.registry.is_empty() {
                chat_request = chat_request.with_tools(tools.clone());
            }

            let (frame_tx, mut frame_rx) = mpsc::channel(64);
            let provider = self.provider.clone();
            let stream_task =
                tokio::spawn(async move { provider.stream_call(chat_request, frame_tx).await });

            let parsed = tokio::select! {
                parsed = parse_stream(&mut frame_rx) => parsed,
                _ = ctx.cancelled() => {
                    stream_task.abort();
                    return;
                }
            };

            // Dropping the receiver unblocks the producer if parsing aborted
            // mid-stream; its sends fail and the task returns promptly.
            drop(frame_rx);
            let stream_result = stream_task.await;

            let parsed = match parsed {
                Ok(parsed) => parsed,
                Err(e) => {
                    let _ = events
                        .send(StreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            match stream_result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let _ = events
                        .send(StreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    let _ = events
                        .send(StreamEvent::Error {
                            message: format!("stream task failed: {e}"),
                        })
                        .await;
                    return;
                }
            }

            if !parsed.tool_calls.is_empty() {
                let _ = events
                    .send(StreamEvent::thinking("validating tool call"))
                    .await;

                let first = &parsed.tool_calls[0];
                let accepted = self
                    .validator
                    .validate(
                        self.provider.as_ref(),
                        &self.prompts,
                        &request.prompt,
                        first,
                    )
                    .await;

                if !accepted {
                    debug!(tool = %first.function.name, "Tool call rejected, redirecting to text");
                    let assistant = ChatMessage::assistant_with_tool_calls(
                        parsed.text.clone(),
                        parsed.tool_calls.clone(),
                    );
                    self.push(&session_id, &mut history, assistant).await;

                    let redirect =
                        ChatMessage::user(self.prompts.render(FORCE_TEXT_RESPONSE, &[]).await);
                    self.push(&session_id, &mut history, redirect).await;
                    continue;
                }

                let fingerprint = tool_call_fingerprint(first);
                if previous_fingerprint.as_deref() == Some(fingerprint.as_str()) {
                    warn!(tool = %first.function.name, "Duplicate tool call suppressed");
                    let redirect =
                        ChatMessage::user(self.prompts.render(DUPLICATE_TOOL_CALL, &[]).await);
                    self.push(&session_id, &mut history, redirect).await;
                    continue;
                }
                previous_fingerprint = Some(fingerprint);

                let assistant = ChatMessage::assistant_with_tool_calls(
                    parsed.text.clone(),
                    parsed.tool_calls.clone(),
                );
                self.push(&session_id, &mut history, assistant).await;

                // All calls of this assistant message run concurrently;
                // join_all hands results back in the original call order.
                let executions = parsed
                    .tool_calls
                    .iter()
                    .map(|call| execute_tool_call(self, ctx.clone(), call, &session_id, events));
                let results = tokio::select! {
                    results = futures::future::join_all(executions) => results,
                    _ = ctx.cancelled() => return,
                };

                for result in results {
                    self.push(&session_id, &mut history, result).await;
                }

                let _ = events
                    .send(StreamEvent::thinking("processing tool results"))
                    .await;
                continue;
            }

            // Text-only reply: the final answer.
            let _ = events
                .send(StreamEvent::thinking("generating final answer"))
                .await;
            let _ = events
                .send(StreamEvent::Token {
                    text: parsed.text.clone(),
                })
                .await;

            self.store.add_note(parsed.text.clone()).await;
            let assistant = ChatMessage::assistant(parsed.text);
            self.push(&session_id, &mut history, assistant).await;
            info!(session_id = %session_id, iterations = iteration + 1, "Request complete");
            return;
        }

        warn!(session_id = %session_id, "Iteration limit reached without a final answer");
        let _ = events
            .send(StreamEvent::Error {
                message: "Iteration limit reached.".into(),
            })
            .await;
    }

    async fn push(&self, session_id: &str, history: &mut Vec<ChatMessage>, message: ChatMessage) {
        history.push(message.clone());
        self.store.append_message(session_id, message).await;
    }

    /// Resolve the effective session: an explicit id is used (created on
    /// first sight), otherwise the current session, otherwise a fresh
    /// auto-titled one.
    async fn resolve_session(&self, requested: &str) -> String {
        if !requested.is_empty() {
            if !self.store.session_exists(requested).await {
                self.store
                    .create_session(requested, auto_session_title())
                    .await;
            }
            return requested.to_string();
        }

        let current = self.store.current_session_id().await;
        if !current.is_empty() && self.store.session_exists(&current).await {
            return current;
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.store.create_session(&id, auto_session_title()).await;
        id
    }
}

fn auto_session_title() -> String {
    format!("Session-{}", chrono::Utc::now().timestamp())
}

/// Stable identity of a tool call: SHA-256 of its serialized JSON. Used to
/// suppress identical calls in consecutive iterations.
fn tool_call_fingerprint(call: &ToolCall) -> String {
    let serialized = serde_json::to_string(call).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}
