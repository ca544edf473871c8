//! Vector similarity search over knowledge documents.
//!
//! `JsonlVectorStore` keeps documents in memory and persists them to
//! `<base>/vectors.jsonl` (one JSON-encoded `Document` per line) through a
//! bounded async write queue, so adds never block on disk I/O.

use oxbow_core::document::Document;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

const VECTOR_FILE_NAME: &str = "vectors.jsonl";
const WRITE_QUEUE_CAPACITY: usize = 1000;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]; 0.0 for empty, mismatched, or zero-length
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// One search result: a document and its similarity to the query.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc: Document,
    pub score: f32,
}

/// In-memory document store with JSONL persistence.
pub struct JsonlVectorStore {
    docs: Arc<RwLock<Vec<Document>>>,
    file_path: Option<PathBuf>,
    queue: std::sync::Mutex<Option<mpsc::Sender<Document>>>,
    writer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl JsonlVectorStore {
    /// Open a store persisted under `persist_dir`, or fully in-memory when
    /// `persist_dir` is `None`. Corrupt lines in an existing file are
    /// skipped with a warning.
    pub async fn open(persist_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let file_path = match persist_dir {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                Some(dir.join(VECTOR_FILE_NAME))
            }
            None => None,
        };

        let docs = file_path
            .as_deref()
            .map(load_jsonl)
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let writer = tokio::spawn(persistence_loop(rx, file_path.clone()));

        Ok(Self {
            docs: Arc::new(RwLock::new(docs)),
            file_path,
            queue: std::sync::Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Add a document and queue it for persistence. The in-memory copy is
    /// always retained; when the write queue is saturated or the store is
    /// closed, the async write is dropped with a warning.
    pub async fn add(&self, doc: Document) {
        self.docs.write().await.push(doc.clone());

        if self.file_path.is_none() {
            return;
        }
        let sender = self.queue.lock().ok().and_then(|guard| guard.clone());
        let queued = match sender {
            Some(tx) => tx.try_send(doc).is_ok(),
            None => false,
        };
        if !queued {
            warn!("Vector store write queue is full, dropping document for async write");
        }
    }

    /// Top-k documents by cosine similarity to the query vector. Documents
    /// with a mismatched embedding dimension are skipped.
    pub async fn search(&self, query: &[f32], top_k: usize) -> Vec<SearchHit> {
        let docs = self.docs.read().await;

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .filter(|doc| doc.embedding.len() == query.len() && !doc.embedding.is_empty())
            .map(|doc| SearchHit {
                score: cosine_similarity(&doc.embedding, query),
                doc: doc.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Stop the persistence task after draining queued writes.
    pub async fn close(&self) {
        // Dropping the sender closes the queue; the loop drains what is
        // left and exits.
        if let Ok(mut guard) = self.queue.lock() {
            guard.take();
        }
        if let Some(handle) = self.writer.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn persistence_loop(mut rx: mpsc::Receiver<Document>, file_path: Option<PathBuf>) {
    let Some(path) = file_path else {
        // Nothing to persist; just drain so senders never observe a closed
        // channel as an error.
        while rx.recv().await.is_some() {}
        return;
    };

    while let Some(doc) = rx.recv().await {
        if let Err(e) = append_jsonl(&path, &doc) {
            warn!(error = %e, "Failed to persist document to vector store");
        }
    }
}

fn append_jsonl(path: &std::path::Path, doc: &Document) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    let line = serde_json::to_string(doc)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn load_jsonl(path: &std::path::Path) -> Vec<Document> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let docs: Vec<Document> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Document>(line) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(error = %e, "Skipping corrupt vector store line");
                None
            }
        })
        .collect();

    info!(count = docs.len(), path = %path.display(), "Loaded documents from vector store");
    docs
}
