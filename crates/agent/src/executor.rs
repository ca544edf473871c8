//! Tool executor — runs one tool invocation with streaming output and the
//! sensitivity gate.
//!
//! The executor never fails the request: an unknown tool, a denial, or an
//! execution error all become tool-role messages so the model can observe
//! the outcome and correct itself.

use oxbow_core::event::StreamEvent;
use oxbow_core::message::{ChatMessage, ToolCall};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::loop_runner::Agent;
use crate::tool::ToolOutput;

pub(crate) const DENIED_RESULT: &str = "User denied the execution of this tool.";

/// Execute one tool call and return its tool-role result message.
///
/// Event discipline: `tool_start` precedes every `tool_output` of this
/// call, which precede its `tool_end`. A denied sensitive call emits no
/// bracket at all — only the `awaiting_confirmation` and a `thinking`
/// noting the denial.
pub(crate) async fn execute_tool_call(
    agent: &Agent,
    ctx: CancellationToken,
    call: &ToolCall,
    session_id: &str,
    events: &mpsc::Sender<StreamEvent>,
) -> ChatMessage {
    let name = call.function.name.clone();
    let arguments = call.function.arguments.clone();

    let Some(tool) = agent.registry().get(&name) else {
        // The model must see the error so it can correct itself.
        let result = format!("unknown tool: {name}");
        warn!(tool = %name, "Tool call for unregistered tool");
        let _ = events
            .send(StreamEvent::ToolStart {
                tool_name: name.clone(),
                arguments: arguments.clone(),
            })
            .await;
        let _ = events
            .send(StreamEvent::ToolOutput {
                tool_name: name.clone(),
                output: result.clone(),
            })
            .await;
        let _ = events
            .send(StreamEvent::ToolEnd {
                tool_name: name.clone(),
                arguments,
            })
            .await;
        return ChatMessage::tool_result(name, result);
    };

    if tool.is_sensitive() {
        let (confirmation_id, decision) = agent.confirmations().register().await;
        let _ = events
            .send(StreamEvent::AwaitingConfirmation {
                confirmation_id,
                tool_name: name.clone(),
                arguments: arguments.clone(),
            })
            .await;

        // A closed channel (expiry) and a cancelled request both read as
        // "no decision received", which is a denial.
        let allowed = tokio::select! {
            decision = decision => decision.unwrap_or(false),
            _ = ctx.cancelled() => false,
        };

        if !allowed {
            debug!(tool = %name, "Sensitive tool execution denied");
            let _ = events
                .send(StreamEvent::thinking("user denied execution"))
                .await;
            return ChatMessage::tool_result(name, DENIED_RESULT);
        }
    }

    let _ = events
        .send(StreamEvent::ToolStart {
            tool_name: name.clone(),
            arguments: arguments.clone(),
        })
        .await;

    // Pipe: the tool writes lines, the forwarder emits one tool_output per
    // line. Dropping the sink ends the forwarder once it drains.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    let forwarder = {
        let events = events.clone();
        let tool_name = name.clone();
        tokio::spawn(async move {
            while let Some(chunk) = line_rx.recv().await {
                for line in chunk.split('\n') {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = events
                        .send(StreamEvent::ToolOutput {
                            tool_name: tool_name.clone(),
                            output: line.to_string(),
                        })
                        .await;
                }
            }
        })
    };

    let output = ToolOutput::new(line_tx);
    let args_json = call.arguments_json();
    let result = tool
        .execute(ctx, &args_json, session_id, agent, &output)
        .await;
    drop(output);
    let _ = forwarder.await;

    let _ = events
        .send(StreamEvent::ToolEnd {
            tool_name: name.clone(),
            arguments,
        })
        .await;

    let text = match result {
        Ok(text) => text,
        Err(e) => {
            warn!(tool = %name, error = %e, "Tool execution failed");
            format!("Tool '{name}' execution failed.\nError: {e}")
        }
    };
    ChatMessage::tool_result(name, text)
}
