//! Stream parser — turns the provider's line-delimited JSON frames into
//! accumulated answer text and tool calls.
//!
//! Each frame is either an error (which aborts parsing), or an arbitrary
//! JSON object from which `message.content` and `message.tool_calls` are
//! extracted. Tool calls missing a `type` field are coerced to "function".
//!
//! Some models never use the native tool_calls field and instead emit the
//! call as JSON prose (often inside a Markdown code fence). When the stream
//! ends with no native calls but the text looks like it contains one, the
//! fallback extractor recovers it.

use oxbow_core::event::StreamEvent;
use oxbow_core::message::ToolCall;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// The outcome of consuming one LLM stream.
#[derive(Debug, Default)]
pub struct ParsedStream {
    /// Accumulated answer text.
    pub text: String,
    /// Tool calls, native or recovered by the fallback extractor.
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    /// The stream carried an error frame.
    #[error("stream error: {0}")]
    ErrorFrame(String),
}

/// Consume frames until the channel closes (or an error frame arrives) and
/// return the accumulated text and tool calls.
pub async fn parse_stream(rx: &mut mpsc::Receiver<String>) -> Result<ParsedStream, ParseError> {
    let mut parsed = ParsedStream::default();

    while let Some(line) = rx.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // A frame that decodes to our own event type with type == "error"
        // is a mid-stream failure forwarded by the provider.
        if let Ok(StreamEvent::Error { message }) = serde_json::from_str::<StreamEvent>(line) {
            return Err(ParseError::ErrorFrame(message));
        }

        let Ok(frame) = serde_json::from_str::<serde_json::Value>(line) else {
            trace!(line = %line, "Ignoring unparseable stream frame");
            continue;
        };

        // Backend-native error frames look like {"error": "..."}.
        if let Some(message) = frame.get("error").and_then(|e| e.as_str()) {
            return Err(ParseError::ErrorFrame(message.to_string()));
        }

        if let Some(message) = frame.get("message") {
            if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
                parsed.text.push_str(content);
            }
            if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
                for call in calls {
                    match serde_json::from_value::<ToolCall>(call.clone()) {
                        Ok(tc) => parsed.tool_calls.push(tc),
                        Err(e) => trace!(error = %e, "Skipping malformed tool_call frame entry"),
                    }
                }
            }
        }
    }

    if parsed.tool_calls.is_empty() {
        if let Some(calls) = extract_tool_calls_from_text(&parsed.text) {
            debug!(count = calls.len(), "Recovered tool calls from prose");
            parsed.tool_calls = calls;
        }
    }

    Ok(parsed)
}

/// Fallback extraction of tool calls from prose JSON.
///
/// Only attempted when the text contains a `"name"` field. Strips Markdown
/// code fences, windows the text from the first `{` to the last `}`
/// (greedy), then tries in order: a full tool call, a flat
/// `{name, arguments}` record, a tool call list.
pub fn extract_tool_calls_from_text(text: &str) -> Option<Vec<ToolCall>> {
    if !text.contains("\"name\"") {
        return None;
    }

    let stripped = strip_code_fences(text);
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end < start {
        return None;
    }
    let candidate = &stripped[start..=end];

    if let Ok(call) = serde_json::from_str::<ToolCall>(candidate) {
        return Some(vec![call]);
    }

    if let Ok(flat) = serde_json::from_str::<FlatCall>(candidate) {
        return Some(vec![ToolCall::new(flat.name, flat.arguments)]);
    }

    // A list needs its own window: from the first '[' to the last ']'.
    let list_start = stripped.find('[');
    let list_end = stripped.rfind(']');
    if let (Some(s), Some(e)) = (list_start, list_end) {
        if s < e {
            if let Ok(calls) = serde_json::from_str::<Vec<ToolCall>>(&stripped[s..=e]) {
                if !calls.is_empty() {
                    return Some(calls);
                }
            }
        }
    }

    None
}

/// A tool call emitted as a bare `{name, arguments}` object.
#[derive(serde::Deserialize)]
struct FlatCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Map<String, serde_json::Value>,
}

fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}
