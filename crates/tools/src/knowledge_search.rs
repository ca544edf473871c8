//! Knowledge base search — embeds the query and ranks stored documents.

use async_trait::async_trait;
use oxbow_agent::{Agent, Tool, ToolOutput};
use oxbow_core::error::ToolError;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_TOP_K: usize = 3;
const MAX_TOP_K: usize = 10;

#[derive(Debug, Deserialize)]
struct KnowledgeSearchArgs {
    query: String,

    #[serde(default)]
    top_k: usize,
}

pub struct KnowledgeSearchTool;

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "knowledge_search"
    }

    fn description(&self) -> &str {
        "Search the ingested knowledge base for relevant text chunks, ranked by similarity."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "top_k": { "type": "integer", "description": "Maximum results (default 3)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        _ctx: CancellationToken,
        args_json: &str,
        _session_id: &str,
        agent: &Agent,
        output: &ToolOutput,
    ) -> Result<String, ToolError> {
        let args: KnowledgeSearchArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("query is empty".into()));
        }

        let top_k = match args.top_k {
            0 => DEFAULT_TOP_K,
            n => n.min(MAX_TOP_K),
        };

        let embedding = agent.provider().embed(&args.query).await.map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: "knowledge_search".into(),
                reason: format!("embedding failed: {e}"),
            }
        })?;

        let hits = agent.vectors().search(&embedding, top_k).await;
        debug!(query = %args.query, hits = hits.len(), "Knowledge search complete");

        if hits.is_empty() {
            return Ok("No relevant knowledge found.".into());
        }

        let mut lines = Vec::with_capacity(hits.len());
        for hit in &hits {
            let source = hit
                .doc
                .metadata
                .get("source")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown");
            let line = format!("[score={:.2}] ({source}) {}", hit.score, hit.doc.content);
            output.write_line(line.clone()).await;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }
}
