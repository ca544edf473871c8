//! File write tool — sensitive, gated on user confirmation by the
//! executor. Relative paths only, overwrite or append modes.

use async_trait::async_trait;
use oxbow_agent::{Agent, Tool, ToolOutput};
use oxbow_core::error::ToolError;
use serde::Deserialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;

const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,

    /// "overwrite" (default) or "append".
    #[serde(default)]
    mode: String,
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file under the working directory. Mode 'overwrite' replaces the file, 'append' adds to it."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Relative file path to write" },
                "content": { "type": "string", "description": "The content to write" },
                "mode": { "type": "string", "enum": ["overwrite", "append"], "description": "Write mode (default overwrite)" }
            },
            "required": ["path", "content"]
        })
    }

    fn is_sensitive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        _ctx: CancellationToken,
        args_json: &str,
        _session_id: &str,
        _agent: &Agent,
        _output: &ToolOutput,
    ) -> Result<String, ToolError> {
        let args: WriteFileArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        if Path::new(&args.path).is_absolute() {
            return Err(ToolError::PermissionDenied {
                tool_name: "write_file".into(),
                reason: "absolute path not allowed".into(),
            });
        }
        if args.content.len() > MAX_CONTENT_SIZE {
            return Err(ToolError::InvalidArguments(
                "content too large (max 10MB)".into(),
            ));
        }

        let mode = if args.mode.is_empty() {
            "overwrite"
        } else {
            args.mode.as_str()
        };

        if let Some(parent) = Path::new(&args.path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ToolError::ExecutionFailed {
                        tool_name: "write_file".into(),
                        reason: format!("failed to create directory: {e}"),
                    }
                })?;
            }
        }

        match mode {
            "overwrite" => {
                tokio::fs::write(&args.path, &args.content)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        tool_name: "write_file".into(),
                        reason: e.to_string(),
                    })?;
                Ok(format!("Wrote {} bytes to {}", args.content.len(), args.path))
            }
            "append" => {
                use tokio::io::AsyncWriteExt;
                let mut file = tokio::fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&args.path)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        tool_name: "write_file".into(),
                        reason: e.to_string(),
                    })?;
                file.write_all(args.content.as_bytes()).await.map_err(|e| {
                    ToolError::ExecutionFailed {
                        tool_name: "write_file".into(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(format!(
                    "Appended {} bytes to {}",
                    args.content.len(),
                    args.path
                ))
            }
            other => Err(ToolError::InvalidArguments(format!(
                "unknown mode: {other}"
            ))),
        }
    }
}
