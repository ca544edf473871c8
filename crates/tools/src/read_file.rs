//! File read tool — size-capped reads with optional chunking.

use async_trait::async_trait;
use oxbow_agent::{Agent, Tool, ToolOutput};
use oxbow_core::error::ToolError;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const MAX_CHUNK_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,

    /// Chunk size in bytes; 0 reads the whole file.
    #[serde(default)]
    chunk_size: usize,

    /// Byte offset to start reading from.
    #[serde(default)]
    offset: u64,
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file, subject to a 10MB size limit. Supports chunked reads via chunk_size and offset."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "The file path to read" },
                "chunk_size": { "type": "integer", "description": "Bytes per chunk; 0 reads the whole file" },
                "offset": { "type": "integer", "description": "Byte offset to start from" }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        _ctx: CancellationToken,
        args_json: &str,
        _session_id: &str,
        _agent: &Agent,
        _output: &ToolOutput,
    ) -> Result<String, ToolError> {
        let args: ReadFileArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let metadata = tokio::fs::metadata(&args.path).await.map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: e.to_string(),
            }
        })?;
        if metadata.is_dir() {
            return Err(ToolError::InvalidArguments("path is a directory".into()));
        }
        if metadata.len() > MAX_FILE_SIZE {
            return Err(ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: "file too large (max 10MB)".into(),
            });
        }

        let mut file = tokio::fs::File::open(&args.path).await.map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: e.to_string(),
            }
        })?;

        if args.offset > 0 {
            file.seek(std::io::SeekFrom::Start(args.offset))
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "read_file".into(),
                    reason: format!("seek failed: {e}"),
                })?;
        }

        if args.chunk_size > 0 {
            let chunk_size = args.chunk_size.min(MAX_CHUNK_SIZE);
            let mut buffer = vec![0u8; chunk_size];
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "read_file".into(),
                    reason: format!("chunk read failed: {e}"),
                })?;
            return Ok(String::from_utf8_lossy(&buffer[..n]).into_owned());
        }

        let mut content = String::new();
        file.read_to_string(&mut content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: e.to_string(),
            })?;
        Ok(content)
    }
}
