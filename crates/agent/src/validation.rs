//! Tool-call validation — two-stage rejection of implausible calls.
//!
//! Models hallucinate tool calls: a bare "hello" proposing a web search is
//! the classic case. Stage A is a fast heuristic (greeting shortcut plus a
//! configured keyword check); stage B asks the model itself whether the
//! call is plausible. Stage B fails open — a flaky validator must never
//! penalize a real request.

use oxbow_core::message::{ChatMessage, ToolCall};
use oxbow_core::provider::{ChatRequest, Provider};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::prompts::{PromptManager, TOOL_VALIDATION};

/// Short prompts that are greetings, never tool-call requests.
const GREETINGS: &[&str] = &["hello", "hi", "hey", "你好", "您好", "你好啊", "在吗"];

/// Affirmative markers accepted from the validation model, one per
/// supported locale.
const AFFIRMATIVES: &[&str] = &["yes", "是", "có"];

/// Heuristic + model-assisted validator for proposed tool calls.
pub struct ToolValidator {
    keywords: HashMap<String, Vec<String>>,
}

impl ToolValidator {
    /// `keywords` maps tool name → required keyword list; a tool absent
    /// from the map is always rejected.
    pub fn new(keywords: HashMap<String, Vec<String>>) -> Self {
        Self { keywords }
    }

    /// Stage A: reject greetings and calls whose tool has no keyword
    /// overlap with the prompt.
    pub fn heuristic_accepts(&self, prompt: &str, call: &ToolCall) -> bool {
        let normalized = prompt.trim().to_lowercase();

        if normalized.len() <= 30 && GREETINGS.contains(&normalized.as_str()) {
            debug!(tool = %call.function.name, "Rejecting tool call for greeting prompt");
            return false;
        }

        let Some(required) = self.keywords.get(&call.function.name) else {
            debug!(tool = %call.function.name, "Rejecting tool call for unconfigured tool");
            return false;
        };

        let matched = required
            .iter()
            .any(|keyword| normalized.contains(&keyword.to_lowercase()));
        if !matched {
            debug!(tool = %call.function.name, "Rejecting tool call, no keyword overlap");
        }
        matched
    }

    /// Full validation: stage A, then a tools-free model check. Accepts iff
    /// the model's reply contains an affirmative; any provider error
    /// fails open.
    pub async fn validate(
        &self,
        provider: &dyn Provider,
        prompts: &PromptManager,
        prompt: &str,
        call: &ToolCall,
    ) -> bool {
        if !self.heuristic_accepts(prompt, call) {
            return false;
        }

        let rendered = prompts
            .render(
                TOOL_VALIDATION,
                &[
                    ("prompt", prompt),
                    ("tool_name", &call.function.name),
                    ("arguments", &call.arguments_json()),
                ],
            )
            .await;

        let request = ChatRequest::new(vec![ChatMessage::user(rendered)]);
        match provider.call(request).await {
            Ok(response) => match response.first_choice() {
                Some(choice) => {
                    let answer = choice.message.content.to_lowercase();
                    AFFIRMATIVES.iter().any(|a| answer.contains(a))
                }
                None => true,
            },
            Err(e) => {
                warn!(error = %e, "Tool validation model call failed, accepting call");
                true
            }
        }
    }
}
