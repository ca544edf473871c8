//! Provider trait — the abstraction over LLM backends.
//!
//! A provider knows how to send a conversation to an LLM and get a response
//! back: one-shot (`call`), streaming (`stream_call`), or as an embedding
//! vector (`embed`). The agent loop never knows which backend is behind the
//! trait object.
//!
//! Streaming contract: the provider owns HTTP-level framing and writes one
//! logical JSON frame per line to the sink channel. Each frame is a
//! message-chunk (`{"message":{"content":...,"tool_calls":[...]}}`), a done
//! marker, or an error frame; the stream parser never sees partial lines.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{ChatMessage, Role, ToolCall};

/// One chat request to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model override; `None` uses the provider's configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// The conversation so far.
    pub messages: Vec<ChatMessage>,

    /// Tool metadata records (`{type:"function",function:{...}}`) passed
    /// through opaquely, or `None` for a tools-free call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            messages,
            tools: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.is_empty() {
            self.model = Some(model);
        }
        self
    }

    pub fn with_tools(mut self, tools: serde_json::Value) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The assistant message inside a choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default = "assistant_role")]
    pub role: Role,

    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

fn assistant_role() -> Role {
    Role::Assistant
}

impl ChatResponse {
    /// The first choice, which is the only one the core consumes.
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

/// The LLM backend contract.
///
/// All operations honor cancellation within a bounded latency: requests
/// carry an HTTP timeout, and callers drop the returned futures when the
/// request context is cancelled.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable backend name (e.g. "ollama").
    fn name(&self) -> &str;

    /// One-shot chat call. Implementations may retry once without tools
    /// when the backend rejects tool metadata.
    async fn call(&self, request: ChatRequest) -> std::result::Result<ChatResponse, ProviderError>;

    /// Streaming chat call: writes line-delimited JSON frames to `sink` as
    /// they arrive, then returns. A dropped receiver ends the stream early
    /// without error.
    ///
    /// The default implementation performs a one-shot call and forwards the
    /// result as a single message frame followed by a done frame.
    async fn stream_call(
        &self,
        request: ChatRequest,
        sink: mpsc::Sender<String>,
    ) -> std::result::Result<(), ProviderError> {
        let response = self.call(request).await?;
        if let Some(choice) = response.first_choice() {
            let frame = serde_json::json!({
                "message": {
                    "role": "assistant",
                    "content": choice.message.content,
                    "tool_calls": choice.message.tool_calls,
                },
                "done": false,
            });
            let _ = sink.send(frame.to_string()).await;
        }
        let _ = sink.send(serde_json::json!({"done": true}).to_string()).await;
        Ok(())
    }

    /// Embed a text into a fixed-dimension float vector.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError>;
}
