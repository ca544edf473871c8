//! Code runner — executes model-written code inside a locked-down Docker
//! container.
//!
//! The container runs with no network, a pids limit, and memory/CPU caps
//! from the sandbox configuration. A `docker info` health probe guards
//! every dispatch: when the runtime is down, the tool reports "sandbox
//! unavailable" as its result so the model can tell the user instead of
//! the request failing.

use async_trait::async_trait;
use oxbow_agent::{Agent, Tool, ToolOutput};
use oxbow_config::SandboxConfig;
use oxbow_core::error::ToolError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SANDBOX_ROOT: &str = "sandboxes";
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct RunCodeArgs {
    language: String,
    code: String,

    /// Extra files to create in the workspace (path → content).
    #[serde(default)]
    files: HashMap<String, String>,

    /// Execution timeout in seconds; clamped to the configured maximum.
    #[serde(default)]
    timeout: u64,
}

pub struct RunCodeTool {
    config: SandboxConfig,
    slots: Arc<Semaphore>,
}

impl RunCodeTool {
    pub fn new(config: SandboxConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self { config, slots }
    }

    fn effective_timeout(&self, requested: u64) -> u64 {
        if requested == 0 {
            self.config.default_timeout
        } else {
            requested.min(self.config.max_timeout)
        }
    }
}

#[async_trait]
impl Tool for RunCodeTool {
    fn name(&self) -> &str {
        "run_code"
    }

    fn description(&self) -> &str {
        "Run code in an isolated sandbox (languages: python, go). Returns stdout/stderr."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "language": { "type": "string", "description": "python or go" },
                "code": { "type": "string", "description": "Source code to run" },
                "files": { "type": "object", "description": "Extra files to create (path -> content)" },
                "timeout": { "type": "integer", "description": "Execution timeout in seconds" }
            },
            "required": ["language", "code"]
        })
    }

    async fn execute(
        &self,
        ctx: CancellationToken,
        args_json: &str,
        _session_id: &str,
        _agent: &Agent,
        output: &ToolOutput,
    ) -> Result<String, ToolError> {
        let args: RunCodeArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        if !sandbox_available().await {
            warn!("Container runtime health probe failed");
            return Ok("sandbox unavailable".into());
        }

        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| ToolError::SandboxUnavailable("sandbox slots closed".into()))?;

        let timeout = self.effective_timeout(args.timeout);
        let workspace = prepare_workspace(&args).await?;
        let result = self
            .run_container(&ctx, &args, &workspace, timeout, output)
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
            warn!(workspace = %workspace.display(), error = %e, "Failed to clean sandbox workspace");
        }
        result
    }
}

impl RunCodeTool {
    async fn run_container(
        &self,
        ctx: &CancellationToken,
        args: &RunCodeArgs,
        workspace: &PathBuf,
        timeout: u64,
        output: &ToolOutput,
    ) -> Result<String, ToolError> {
        let (image, shell_cmd) = match args.language.as_str() {
            "python" => ("python:3.11", format!("timeout {timeout} python3 main.py")),
            "go" => ("golang:1.22", format!("timeout {timeout} go run .")),
            _ => ("alpine:3.18", format!("timeout {timeout} cat main.txt")),
        };

        let mount = format!(
            "{}:/work",
            workspace
                .canonicalize()
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "run_code".into(),
                    reason: e.to_string(),
                })?
                .display()
        );
        let memory = format!("{}m", self.config.memory_mb);
        let cpus = format!("{}", self.config.cpu_quota);

        debug!(language = %args.language, image, timeout, "Dispatching sandbox run");

        let mut child = Command::new("docker")
            .args([
                "run",
                "--rm",
                "-v",
                mount.as_str(),
                "-w",
                "/work",
                "--network",
                "none",
                "--pids-limit",
                "64",
                "--memory",
                memory.as_str(),
                "--cpus",
                cpus.as_str(),
                image,
                "sh",
                "-lc",
                shell_cmd.as_str(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "run_code".into(),
                reason: format!("failed to start container: {e}"),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Stream container output while it runs; keep a copy as the result.
        // Both pipes are drained concurrently so neither can fill and stall
        // the container.
        let collect = async {
            let drain_pipe = |reader: Option<tokio::process::ChildStdout>| async move {
                let mut buf = String::new();
                if let Some(r) = reader {
                    let mut lines = BufReader::new(r).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        output.write_line(line.clone()).await;
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
                buf
            };
            let drain_err = |reader: Option<tokio::process::ChildStderr>| async move {
                let mut buf = String::new();
                if let Some(r) = reader {
                    let mut lines = BufReader::new(r).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        output.write_line(line.clone()).await;
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
                buf
            };

            let (out_buf, err_buf) = tokio::join!(drain_pipe(stdout), drain_err(stderr));
            let status = child.wait().await;
            (format!("{out_buf}{err_buf}"), status)
        };

        // the container gets a small grace window beyond the in-container
        // `timeout` before the host gives up
        let deadline = Duration::from_secs(timeout + 3);
        let (combined, status) = tokio::select! {
            result = tokio::time::timeout(deadline, collect) => match result {
                Ok(pair) => pair,
                Err(_) => {
                    return Err(ToolError::Timeout {
                        tool_name: "run_code".into(),
                        timeout_secs: timeout,
                    });
                }
            },
            _ = ctx.cancelled() => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "run_code".into(),
                    reason: "cancelled".into(),
                });
            }
        };

        match status {
            Ok(status) if status.success() => Ok(combined),
            Ok(status) => Ok(format!(
                "error: exit status {}\noutput:\n{combined}",
                status.code().unwrap_or(-1)
            )),
            Err(e) => Err(ToolError::ExecutionFailed {
                tool_name: "run_code".into(),
                reason: e.to_string(),
            }),
        }
    }
}

/// `docker info` must succeed before any dispatch.
async fn sandbox_available() -> bool {
    let probe = Command::new("docker")
        .arg("info")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    matches!(
        tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe).await,
        Ok(Ok(status)) if status.success()
    )
}

/// Create a unique workspace and lay out the main file plus extras.
/// The path is absolute so later working-directory changes cannot detach
/// the container mount from the cleanup.
async fn prepare_workspace(args: &RunCodeArgs) -> Result<PathBuf, ToolError> {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let root = std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(SANDBOX_ROOT);
    let workspace = root.join(format!("agent_work_{nanos}"));

    let io_err = |e: std::io::Error| ToolError::ExecutionFailed {
        tool_name: "run_code".into(),
        reason: e.to_string(),
    };

    tokio::fs::create_dir_all(&workspace).await.map_err(io_err)?;

    match args.language.as_str() {
        "python" => {
            tokio::fs::write(workspace.join("main.py"), &args.code)
                .await
                .map_err(io_err)?;
        }
        "go" => {
            tokio::fs::write(workspace.join("main.go"), &args.code)
                .await
                .map_err(io_err)?;
            tokio::fs::write(workspace.join("go.mod"), "module sandbox\n\ngo 1.22\n")
                .await
                .map_err(io_err)?;
        }
        _ => {
            tokio::fs::write(workspace.join("main.txt"), &args.code)
                .await
                .map_err(io_err)?;
        }
    }

    for (rel_path, content) in &args.files {
        let full = workspace.join(rel_path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&full, content).await.map_err(io_err)?;
    }

    Ok(workspace)
}
