//! Session management tools — let the model open a fresh conversation
//! thread or switch back to an existing one.

use async_trait::async_trait;
use oxbow_agent::{Agent, Tool, ToolOutput};
use oxbow_core::error::ToolError;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Deserialize)]
struct CreateSessionArgs {
    title: String,
}

pub struct CreateSessionTool;

#[async_trait]
impl Tool for CreateSessionTool {
    fn name(&self) -> &str {
        "create_session"
    }

    fn description(&self) -> &str {
        "Create a new conversation session with the given title and switch to it."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Human-readable session title" }
            },
            "required": ["title"]
        })
    }

    async fn execute(
        &self,
        _ctx: CancellationToken,
        args_json: &str,
        _session_id: &str,
        agent: &Agent,
        _output: &ToolOutput,
    ) -> Result<String, ToolError> {
        let args: CreateSessionArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.title.trim().is_empty() {
            return Err(ToolError::InvalidArguments("title is empty".into()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        agent.store().create_session(&id, args.title.trim()).await;
        info!(session_id = %id, title = %args.title, "Session created by tool");
        Ok(format!(
            "Created session {id} titled '{}' and switched to it.",
            args.title.trim()
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SwitchSessionArgs {
    session_id: String,
}

pub struct SwitchSessionTool;

#[async_trait]
impl Tool for SwitchSessionTool {
    fn name(&self) -> &str {
        "switch_session"
    }

    fn description(&self) -> &str {
        "Switch the current conversation to an existing session by id."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string", "description": "Id of the session to switch to" }
            },
            "required": ["session_id"]
        })
    }

    async fn execute(
        &self,
        _ctx: CancellationToken,
        args_json: &str,
        _session_id: &str,
        agent: &Agent,
        _output: &ToolOutput,
    ) -> Result<String, ToolError> {
        let args: SwitchSessionArgs = serde_json::from_str(args_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        if agent.store().set_current_session(&args.session_id).await {
            Ok(format!("Switched to session {}.", args.session_id))
        } else {
            // not fatal: the model should see the failure and pick another id
            Ok(format!("No session with id '{}'.", args.session_id))
        }
    }
}
