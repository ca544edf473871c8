//! Knowledge document type used by the vector store.

use serde::{Deserialize, Serialize};

/// One chunk of ingested knowledge with its embedding vector.
///
/// The orchestrator treats documents opaquely; only the knowledge-search
/// tool interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,

    pub content: String,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Fixed dimension per deployment (set by the embedding model).
    #[serde(default)]
    pub embedding: Vec<f32>,
}
