//! Web search tool.
//!
//! The actual search HTTP client is an external collaborator; this tool
//! talks to it through the `SearchBackend` trait. The default backend
//! produces deterministic results so the loop can be exercised end-to-end
//! without network access.

use async_trait::async_trait;
use oxbow_agent::{Agent, Tool, ToolOutput};
use oxbow_core::error::ToolError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const DEFAULT_NUM_RESULTS: usize = 10;
const MAX_NUM_RESULTS: usize = 25;

/// One search result on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Contract for the external search client.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<SearchResultItem>, ToolError>;
}

/// Deterministic stand-in backend used when no real client is wired up.
pub struct StubSearchBackend;

#[async_trait]
impl SearchBackend for StubSearchBackend {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<SearchResultItem>, ToolError> {
        Ok((0..num_results)
            .map(|i| SearchResultItem {
                title: format!("Result {} for: {}", i + 1, query),
                link: format!(
                    "https://example.com/search?q={}&p={}",
                    query.replace(' ', "+"),
                    i + 1
                ),
                snippet: format!("Placeholder result {} for the query '{}'.", i + 1, query),
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,

    #[serde(default)]
    num_results: usize,
}

pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(StubSearchBackend),
        }
    }

    pub fn with_backend(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return the top results with titles, links, and snippets."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query" },
                "num_results": { "type": "integer", "description": "How many results to return (default 10)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        _ctx: CancellationToken,
        args_json: &str,
        _session_id: &str,
        _agent: &Agent,
        output: &ToolOutput,
    ) -> Result<String, ToolError> {
        let args: WebSearchArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("query is empty".into()));
        }

        let num_results = match args.num_results {
            0 => DEFAULT_NUM_RESULTS,
            n => n.min(MAX_NUM_RESULTS),
        };

        info!(query = %args.query, num_results, "Executing web search");
        let results = self.backend.search(&args.query, num_results).await?;

        for result in &results {
            output
                .write_line(format!("{} — {}", result.title, result.link))
                .await;
        }

        serde_json::to_string_pretty(&results).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason: e.to_string(),
        })
    }
}
