//! Shared test helpers: a minimal agent wired to a stub provider.

use async_trait::async_trait;
use oxbow_agent::{Agent, ConfirmationBroker, PromptManager, ToolRegistry};
use oxbow_config::AppConfig;
use oxbow_core::error::ProviderError;
use oxbow_core::provider::{ChatRequest, ChatResponse, Choice, ChoiceMessage, Provider};
use oxbow_core::Role;
use oxbow_memory::{JsonlVectorStore, SessionStore};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Provider stub: fixed text answers, fixed two-dimensional embeddings.
pub struct StubProvider;

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn call(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            choices: vec![Choice {
                message: ChoiceMessage {
                    role: Role::Assistant,
                    content: "yes".into(),
                    tool_calls: vec![],
                },
                finish_reason: Some("stop".into()),
            }],
        })
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(vec![1.0, 0.0])
    }
}

/// Build an agent over temp storage. The returned TempDir keeps the
/// backing directories alive for the test's duration.
pub async fn test_agent() -> (Arc<Agent>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SessionStore::open(dir.path().join("memory"))
            .await
            .unwrap(),
    );
    let vectors = Arc::new(JsonlVectorStore::open(None).await.unwrap());

    let agent = Arc::new(Agent::new(
        Arc::new(StubProvider),
        Arc::new(ToolRegistry::new()),
        store,
        vectors,
        Arc::new(ConfirmationBroker::new()),
        Arc::new(PromptManager::new("/nonexistent/prompts")),
        &AppConfig::default(),
    ));
    (agent, dir)
}

/// An output sink whose lines can be inspected after the tool ran.
pub fn capture_output() -> (oxbow_agent::ToolOutput, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(64);
    (oxbow_agent::ToolOutput::new(tx), rx)
}

pub fn drain(mut rx: mpsc::Receiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}
