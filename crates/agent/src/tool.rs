//! Tool trait and registry — the abstraction over agent capabilities.
//!
//! Tools are what let the agent act in the world: run sandboxed code, read
//! and write files, search the web, query the knowledge base. The registry
//! is populated once at startup and read-only afterwards; the agent loop
//! uses it to build the tool metadata sent to the LLM and to dispatch the
//! calls the LLM requests.
//!
//! `execute` receives the agent as a back-reference argument rather than
//! storing it in the tool, which keeps tool values stateless and breaks the
//! agent↔tool construction cycle.

use async_trait::async_trait;
use oxbow_core::error::ToolError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::loop_runner::Agent;

/// Streaming output handle handed to a running tool. Each written line is
/// forwarded to the caller's sink as a `tool_output` event.
pub struct ToolOutput {
    tx: mpsc::Sender<String>,
}

impl ToolOutput {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Write one logical output line. Errors (a departed consumer) are
    /// ignored — tool output is observability, not control flow.
    pub async fn write_line(&self, line: impl Into<String>) {
        let _ = self.tx.send(line.into()).await;
    }
}

/// A capability the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "web_search").
    fn name(&self) -> &str;

    /// Description shown to the LLM so it knows when to call this tool.
    fn description(&self) -> &str;

    /// JSON Schema of the tool's parameters.
    fn schema(&self) -> serde_json::Value;

    /// Sensitive tools are gated on explicit user approval before running.
    fn is_sensitive(&self) -> bool {
        false
    }

    /// Run the tool.
    ///
    /// - `ctx`: cancellation token propagated from the request
    /// - `args_json`: the raw argument JSON produced by the LLM
    /// - `session_id`: the session this invocation belongs to
    /// - `agent`: back-reference for reaching the session store, vector
    ///   store, provider, and confirmation broker
    /// - `output`: streaming sink for incremental output lines
    async fn execute(
        &self,
        ctx: CancellationToken,
        args_json: &str,
        session_id: &str,
        agent: &Agent,
        output: &ToolOutput,
    ) -> Result<String, ToolError>;
}

/// Name → capability mapping. Insert-only at startup; frozen behind an
/// `Arc` afterwards, which makes concurrent reads trivially safe.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool metadata records for the LLM prompt, in registration order.
    pub fn metadata(&self) -> serde_json::Value {
        let records: Vec<serde_json::Value> = self
            .order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.schema(),
                    },
                })
            })
            .collect();
        serde_json::Value::Array(records)
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
