//! Chat message and tool call wire types.
//!
//! These are the value objects that flow through the whole system: the loop
//! builds them, the provider serializes them onto the wire, and the session
//! store appends them to disk one JSON line at a time.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (identity, rules)
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

/// A single conversation turn.
///
/// On assistant messages, `content` and `tool_calls` may coexist but at most
/// one of them is the semantically primary payload. On tool messages, `name`
/// identifies which tool produced the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,

    #[serde(default)]
    pub content: String,

    /// Tool name on tool-role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Opaque base64 image payloads attached to user messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
            images: Vec::new(),
            tool_calls: Vec::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
            images: Vec::new(),
            tool_calls: Vec::new(),
        }
    }

    /// Create a user message carrying image payloads.
    pub fn user_with_images(content: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
            images,
            tool_calls: Vec::new(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            images: Vec::new(),
            tool_calls: Vec::new(),
        }
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            images: Vec::new(),
            tool_calls,
        }
    }

    /// Create a tool result message tagged with the producing tool's name.
    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            name: Some(tool_name.into()),
            images: Vec::new(),
            tool_calls: Vec::new(),
        }
    }
}

/// A tool call requested by the model.
///
/// `kind` is the fixed literal "function"; some models omit it entirely, so
/// deserialization fills it in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,

    pub function: ToolFunction,
}

/// The function half of a tool call: the name and the argument mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,

    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(
        name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            kind: function_kind(),
            function: ToolFunction {
                name: name.into(),
                arguments,
            },
        }
    }

    /// The argument mapping serialized back to a JSON string, as handed to
    /// tool implementations.
    pub fn arguments_json(&self) -> String {
        serde_json::to_string(&self.function.arguments).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = ChatMessage::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn tool_result_carries_name() {
        let msg = ChatMessage::tool_result("web_search", "results...");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.name.as_deref(), Some("web_search"));
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = ChatMessage::user("Test message");
        let json = serde_json::to_string(&msg).unwrap();
        let deserialized: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.content, "Test message");
        assert_eq!(deserialized.role, Role::User);
    }

    #[test]
    fn empty_fields_are_skipped_on_the_wire() {
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("images"));
        assert!(!json.contains("name"));
    }

    #[test]
    fn tool_call_missing_type_defaults_to_function() {
        let json = r#"{"function":{"name":"web_search","arguments":{"query":"rust"}}}"#;
        let call: ToolCall = serde_json::from_str(json).unwrap();
        assert_eq!(call.kind, "function");
        assert_eq!(call.function.name, "web_search");
        assert_eq!(call.function.arguments["query"], "rust");
    }

    #[test]
    fn tool_call_missing_arguments_defaults_to_empty() {
        let json = r#"{"type":"function","function":{"name":"noop"}}"#;
        let call: ToolCall = serde_json::from_str(json).unwrap();
        assert!(call.function.arguments.is_empty());
        assert_eq!(call.arguments_json(), "{}");
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, r#""assistant""#);
    }
}
