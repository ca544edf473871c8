//! The event vocabulary emitted to the caller's sink.
//!
//! Every event serializes as `{"type": ..., "payload": ...}` so a transport
//! adapter (SSE, WebSocket, plain JSON) can forward it verbatim. The sink is
//! a caller-supplied channel and the loop sends synchronously, so a slow
//! consumer applies backpressure all the way up to the LLM stream.

use serde::{Deserialize, Serialize};

/// Events emitted by the agent while processing one request.
///
/// Ordering guarantees within a request:
/// - `tool_start` precedes every `tool_output` of that tool, which precede
///   that tool's `tool_end`; brackets of different tools may interleave.
/// - exactly one terminal `status: stream_complete` is emitted, last.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Human-readable progress note.
    Thinking { text: String },

    /// A tool invocation is starting.
    ToolStart {
        tool_name: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },

    /// One logical chunk of a running tool's output.
    ToolOutput { tool_name: String, output: String },

    /// A tool invocation finished.
    ToolEnd {
        tool_name: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },

    /// Partial or whole answer text.
    Token { text: String },

    /// Terminal answer text; consumers should treat `token` and
    /// `final_answer` interchangeably at end of stream.
    FinalAnswer { text: String },

    /// The request failed; the stream still terminates with a status event.
    Error { message: String },

    /// A sensitive tool is blocked on a user decision.
    AwaitingConfirmation {
        confirmation_id: String,
        tool_name: String,
        arguments: serde_json::Map<String, serde_json::Value>,
    },

    /// Stream lifecycle marker.
    Status { status: StreamStatus },
}

/// Lifecycle markers carried by `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    StreamStart,
    StreamComplete,
    StoppedByUser,
}

impl StreamEvent {
    /// The wire name of this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolOutput { .. } => "tool_output",
            Self::ToolEnd { .. } => "tool_end",
            Self::Token { .. } => "token",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Error { .. } => "error",
            Self::AwaitingConfirmation { .. } => "awaiting_confirmation",
            Self::Status { .. } => "status",
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }
}

/// A caller response resolving a pending confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub confirmation_id: String,
    pub allowed: bool,
}
