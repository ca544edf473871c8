//! Git tool — read-only git subcommands in an existing working directory.

use async_trait::async_trait;
use oxbow_agent::{Agent, Tool, ToolOutput};
use oxbow_core::error::ToolError;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Subcommands that cannot mutate the repository.
const ALLOWED_COMMANDS: &[&str] = &[
    "status",
    "log",
    "diff",
    "show",
    "blame",
    "rev-parse",
    "branch",
    "tag",
    "remote",
    "config",
    "ls-files",
];

#[derive(Debug, Deserialize)]
struct GitCmdArgs {
    workdir: String,
    cmd: Vec<String>,
}

pub struct GitCmdTool;

#[async_trait]
impl Tool for GitCmdTool {
    fn name(&self) -> &str {
        "git_cmd"
    }

    fn description(&self) -> &str {
        "Run a read-only git command (status, log, diff, show, blame, ...) in a working directory."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "workdir": { "type": "string", "description": "Repository working directory" },
                "cmd": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Git subcommand and its arguments, e.g. [\"log\", \"-3\"]"
                }
            },
            "required": ["workdir", "cmd"]
        })
    }

    async fn execute(
        &self,
        ctx: CancellationToken,
        args_json: &str,
        _session_id: &str,
        _agent: &Agent,
        _output: &ToolOutput,
    ) -> Result<String, ToolError> {
        let args: GitCmdArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        if args.workdir.is_empty() {
            return Err(ToolError::InvalidArguments("workdir empty".into()));
        }
        if !std::path::Path::new(&args.workdir).exists() {
            return Err(ToolError::InvalidArguments(format!(
                "workdir does not exist: {}",
                args.workdir
            )));
        }
        let Some(subcommand) = args.cmd.first() else {
            return Err(ToolError::InvalidArguments("cmd empty".into()));
        };
        if !ALLOWED_COMMANDS.contains(&subcommand.as_str()) {
            return Err(ToolError::PermissionDenied {
                tool_name: "git_cmd".into(),
                reason: format!("command '{subcommand}' not allowed"),
            });
        }

        debug!(workdir = %args.workdir, cmd = ?args.cmd, "Running git command");

        let run = Command::new("git")
            .args(&args.cmd)
            .current_dir(&args.workdir)
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            output = tokio::time::timeout(GIT_TIMEOUT, run) => match output {
                Ok(result) => result.map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "git_cmd".into(),
                    reason: e.to_string(),
                })?,
                Err(_) => {
                    return Err(ToolError::Timeout {
                        tool_name: "git_cmd".into(),
                        timeout_secs: GIT_TIMEOUT.as_secs(),
                    });
                }
            },
            _ = ctx.cancelled() => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "git_cmd".into(),
                    reason: "cancelled".into(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Ok(format!("git exited with code {code}\n{stdout}\n{stderr}")
                .trim()
                .to_string());
        }
        Ok(format!("{stdout}{stderr}").trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{capture_output, test_agent};

    async fn run(args: serde_json::Value) -> Result<String, ToolError> {
        let (agent, _keep) = test_agent().await;
        let (output, _rx) = capture_output();
        GitCmdTool
            .execute(
                CancellationToken::new(),
                &args.to_string(),
                "s",
                &agent,
                &output,
            )
            .await
    }

    #[tokio::test]
    async fn mutating_commands_are_blocked() {
        let dir = tempfile::tempdir().unwrap();
        for cmd in ["push", "commit", "reset", "checkout", "clean"] {
            let result = run(serde_json::json!({
                "workdir": dir.path().to_str().unwrap(),
                "cmd": [cmd],
            }))
            .await;
            assert!(
                matches!(result, Err(ToolError::PermissionDenied { .. })),
                "{cmd} should be blocked"
            );
        }
    }

    #[tokio::test]
    async fn missing_workdir_rejected() {
        let result = run(serde_json::json!({
            "workdir": "/nonexistent/repo",
            "cmd": ["status"],
        }))
        .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn empty_cmd_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(serde_json::json!({
            "workdir": dir.path().to_str().unwrap(),
            "cmd": [],
        }))
        .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn status_outside_a_repo_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(serde_json::json!({
            "workdir": dir.path().to_str().unwrap(),
            "cmd": ["status"],
        }))
        .await
        .unwrap();
        // not a repository: git fails but the output is still returned
        assert!(result.contains("exited with code"));
    }
}
