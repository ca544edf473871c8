//! Ollama provider implementation.
//!
//! Talks to an Ollama-compatible chat endpoint:
//! - non-streaming chat completions with tool metadata passthrough
//! - streaming chat as line-delimited JSON frames (NDJSON)
//! - text embeddings
//!
//! Streaming hands complete frame lines to the caller's sink; HTTP chunk
//! boundaries never split a logical frame.

use async_trait::async_trait;
use futures::StreamExt;
use oxbow_core::error::ProviderError;
use oxbow_core::provider::{ChatRequest, ChatResponse};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// An Ollama-compatible LLM provider.
pub struct OllamaProvider {
    name: String,
    chat_url: String,
    embeddings_url: String,
    default_model: String,
    embedding_model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for the given chat endpoint
    /// (e.g. `http://localhost:11434/api/chat`).
    pub fn new(chat_url: impl Into<String>, default_model: impl Into<String>, timeout_secs: u64) -> Self {
        let chat_url = chat_url.into();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        let embeddings_url = derive_endpoint(&chat_url, "/api/embeddings");

        Self {
            name: "ollama".into(),
            chat_url,
            embeddings_url,
            default_model: default_model.into(),
            embedding_model: "nomic-embed-text".into(),
            client,
        }
    }

    /// Override the embedding model and API path.
    pub fn with_embedding(mut self, model: impl Into<String>, api_path: &str) -> Self {
        self.embedding_model = model.into();
        self.embeddings_url = derive_endpoint(&self.chat_url, api_path);
        self
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(tools) = &request.tools {
            body["tools"] = tools.clone();
            body["tool_choice"] = serde_json::json!("auto");
        }
        body
    }

    async fn post_chat(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        self.client
            .post(&self.chat_url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_err)
    }
}

/// Replace the path of the chat URL with another API path on the same host.
fn derive_endpoint(chat_url: &str, api_path: &str) -> String {
    let base = chat_url
        .strip_suffix("/api/chat")
        .or_else(|| chat_url.strip_suffix("/api/chat/"))
        .unwrap_or(chat_url)
        .trim_end_matches('/');
    format!("{base}{api_path}")
}

fn map_reqwest_err(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Whether an error body is the backend refusing tool metadata.
fn is_tools_unsupported(body: &str) -> bool {
    body.to_lowercase().contains("does not support tools")
}

#[async_trait]
impl oxbow_core::Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = self.request_body(&request, false);
        debug!(model = %body["model"], tools = request.tools.is_some(), "Sending chat request");

        let response = self.post_chat(&body).await?;
        let status = response.status().as_u16();

        if status >= 400 {
            let error_body = response.text().await.unwrap_or_default();
            // Some models reject tool metadata outright; one retry without
            // tools gives the caller a plain-text answer instead of a hard
            // failure.
            if request.tools.is_some() && is_tools_unsupported(&error_body) {
                warn!(status, "Model rejected tools, retrying without them");
                let retry = ChatRequest {
                    tools: None,
                    ..request
                };
                let retry_body = self.request_body(&retry, false);
                let response = self.post_chat(&retry_body).await?;
                let status = response.status().as_u16();
                if status >= 400 {
                    let message = response.text().await.unwrap_or_default();
                    return Err(ProviderError::ApiError {
                        status_code: status,
                        message,
                    });
                }
                return response
                    .json::<ChatResponse>()
                    .await
                    .map_err(|e| ProviderError::Malformed(e.to_string()));
            }

            warn!(status, body = %error_body, "Chat request failed");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    async fn stream_call(
        &self,
        request: ChatRequest,
        sink: mpsc::Sender<String>,
    ) -> Result<(), ProviderError> {
        let body = self.request_body(&request, true);
        debug!(model = %body["model"], "Sending streaming chat request");

        let response = self.post_chat(&body).await?;
        let status = response.status().as_u16();

        if status >= 400 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Streaming request failed");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            for line in drain_complete_lines(&mut buffer) {
                trace!(line = %line, "Forwarding stream frame");
                if sink.send(line).await.is_err() {
                    // Receiver dropped: the caller stopped consuming.
                    return Ok(());
                }
            }
        }

        // Trailing frame without a final newline.
        let rest = buffer.trim();
        if !rest.is_empty() {
            let _ = sink.send(rest.to_string()).await;
        }

        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "prompt": text,
        });

        let response = self
            .client
            .post(&self.embeddings_url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        let status = response.status().as_u16();
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status_code: status,
                message,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(parsed.embedding)
    }
}

/// Pull complete newline-terminated lines out of the buffer, leaving any
/// partial tail in place. Empty lines are dropped.
fn drain_complete_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line = buffer[..pos].trim_end_matches('\r').trim().to_string();
        buffer.drain(..=pos);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}
