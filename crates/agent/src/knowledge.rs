//! Knowledge ingestion: split, embed, store.
//!
//! Text is chunked with a recursive splitter that prefers paragraph, then
//! line, then sentence boundaries before falling back to character
//! windows. Chunks are embedded concurrently by a small worker pool and
//! added to the vector store; failed chunks are logged and skipped.

use futures::StreamExt;
use oxbow_core::document::Document;
use oxbow_core::error::Error;
use tracing::{error, info};

use crate::loop_runner::Agent;

const CHUNK_SIZE: usize = 500;
const CHUNK_OVERLAP: usize = 50;
const EMBED_WORKERS: usize = 8;

impl Agent {
    /// Ingest a body of text into the knowledge base under `source`.
    /// Returns the number of chunks stored; errors only when every chunk
    /// failed to embed.
    pub async fn ingest_content(&self, source: &str, content: &str) -> Result<usize, Error> {
        let chunks = recursive_split(content, CHUNK_SIZE, CHUNK_OVERLAP);
        let total = chunks.len();
        info!(source = %source, chunk_count = total, "Ingesting content");

        let documents: Vec<Option<Document>> = futures::stream::iter(
            chunks.into_iter().enumerate().map(|(index, chunk)| async move {
                match self.provider().embed(&chunk).await {
                    Ok(embedding) => {
                        let mut metadata = serde_json::Map::new();
                        metadata.insert("source".into(), serde_json::json!(source));
                        metadata.insert("chunk".into(), serde_json::json!(index));
                        Some(Document {
                            id: uuid::Uuid::new_v4().to_string(),
                            content: chunk,
                            metadata,
                            embedding,
                        })
                    }
                    Err(e) => {
                        error!(source = %source, chunk_index = index, error = %e, "Embed failed for chunk");
                        None
                    }
                }
            }),
        )
        .buffer_unordered(EMBED_WORKERS)
        .collect()
        .await;

        let mut stored = 0usize;
        for doc in documents.into_iter().flatten() {
            self.vectors().add(doc).await;
            stored += 1;
        }

        info!(source = %source, successful_chunks = stored, total_chunks = total, "Content ingestion finished");

        if stored == 0 && total > 0 {
            return Err(Error::Internal(format!(
                "all chunks failed to ingest for source: {source}"
            )));
        }
        Ok(stored)
    }
}

const SEPARATORS: &[&str] = &["\n\n", "\n", "。 ", ". ", " "];

/// Split text into chunks of at most `chunk_size` characters, preferring
/// semantic boundaries and overlapping only at the character-window level.
pub fn recursive_split(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    split_level(text, chunk_size, overlap, 0)
        .into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

fn split_level(text: &str, chunk_size: usize, overlap: usize, level: usize) -> Vec<String> {
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    // Out of separators: hard character windows with overlap.
    if level >= SEPARATORS.len() {
        let chars: Vec<char> = text.chars().collect();
        let stride = chunk_size.saturating_sub(overlap).max(1);
        let mut parts = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + chunk_size).min(chars.len());
            parts.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += stride;
        }
        return parts;
    }

    let separator = SEPARATORS[level];
    let pieces: Vec<&str> = text.split(separator).collect();
    let mut result = Vec::new();
    let mut current = String::new();

    for (i, piece) in pieces.iter().enumerate() {
        let mut part = piece.to_string();
        // keep the separator on all but the last piece so context survives
        if i < pieces.len() - 1 {
            part.push_str(separator);
        }

        if current.chars().count() + part.chars().count() > chunk_size {
            if !current.is_empty() {
                result.push(std::mem::take(&mut current));
            }
            if part.chars().count() > chunk_size {
                result.extend(split_level(&part, chunk_size, overlap, level + 1));
            } else {
                current = part;
            }
        } else {
            current.push_str(&part);
        }
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}
