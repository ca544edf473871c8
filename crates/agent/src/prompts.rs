//! Prompt template management.
//!
//! Templates live as plain text files in a directory, keyed by name
//! (`<name>.txt`), and are loaded lazily with `{placeholder}` substitution.
//! Every template has a built-in fallback constant so a missing or
//! unreadable file degrades to a usable prompt instead of failing the
//! request.

use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::warn;

pub const SYSTEM_DEFAULT: &str = "system_default";
pub const TOOL_VALIDATION: &str = "tool_validation";
pub const FORCE_TEXT_RESPONSE: &str = "force_text_response";
pub const DUPLICATE_TOOL_CALL: &str = "duplicate_tool_call";

const BUILTIN_SYSTEM_DEFAULT: &str = "You are a careful AI pair programmer. You review code, write tests, \
run code in a sandbox, and research answers. Current time: {time}. \
Call a tool only when the task genuinely requires it; otherwise answer in plain text.";

const BUILTIN_TOOL_VALIDATION: &str = "The user asked: \"{prompt}\"\n\
The model wants to call the tool \"{tool_name}\" with arguments: {arguments}\n\
Is calling this tool genuinely required to answer the user's request? Answer yes or no.";

const BUILTIN_FORCE_TEXT_RESPONSE: &str = "That tool call is not appropriate for this request. \
Do not call any tools; answer the user directly in plain text.";

const BUILTIN_DUPLICATE_TOOL_CALL: &str = "You already called that tool with identical arguments. \
Do not repeat the call; summarize the results you already have and answer the user.";

/// Loads and renders prompt templates.
pub struct PromptManager {
    prompts_dir: PathBuf,
    templates: RwLock<HashMap<String, String>>,
    system_override: RwLock<Option<String>>,
}

impl PromptManager {
    /// `dir` defaults to `./prompts` when empty.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let prompts_dir = if dir.as_os_str().is_empty() {
            PathBuf::from("./prompts")
        } else {
            dir
        };
        Self {
            prompts_dir,
            templates: RwLock::new(HashMap::new()),
            system_override: RwLock::new(None),
        }
    }

    /// Override the system prompt entirely (skips file and builtin).
    pub async fn set_system_prompt(&self, prompt: impl Into<String>) {
        *self.system_override.write().await = Some(prompt.into());
    }

    /// The rendered system prompt: the programmatic override if set,
    /// otherwise the `system_default` template with the current time.
    pub async fn system_prompt(&self) -> String {
        if let Some(custom) = self.system_override.read().await.clone() {
            return custom;
        }
        let time = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.render(SYSTEM_DEFAULT, &[("time", &time)]).await
    }

    /// Render a template by name, substituting `{key}` placeholders.
    /// Never fails: a broken template file falls back to the builtin.
    pub async fn render(&self, name: &str, vars: &[(&str, &str)]) -> String {
        let template = self.template(name).await;
        substitute(&template, vars)
    }

    async fn template(&self, name: &str) -> String {
        if let Some(cached) = self.templates.read().await.get(name) {
            return cached.clone();
        }

        let path = self.prompts_dir.join(format!("{name}.txt"));
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                self.templates
                    .write()
                    .await
                    .insert(name.to_string(), content.clone());
                content
            }
            Err(e) => {
                warn!(template = %name, path = %path.display(), error = %e,
                    "Failed to load prompt template, using builtin");
                builtin(name).to_string()
            }
        }
    }
}

fn builtin(name: &str) -> &'static str {
    match name {
        SYSTEM_DEFAULT => BUILTIN_SYSTEM_DEFAULT,
        TOOL_VALIDATION => BUILTIN_TOOL_VALIDATION,
        FORCE_TEXT_RESPONSE => BUILTIN_FORCE_TEXT_RESPONSE,
        DUPLICATE_TOOL_CALL => BUILTIN_DUPLICATE_TOOL_CALL,
        _ => "",
    }
}

fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
