//! Memory system implementations for Oxbow.
//!
//! - `session_store`: in-memory sessions with batched, durable append-only
//!   per-session logs plus a periodic metadata snapshot
//! - `vector`: cosine similarity and the JSONL-backed document store

pub mod session_store;
pub mod vector;

pub use session_store::{MemoryStorePersist, SessionMeta, SessionStore, StoreOptions};
pub use vector::{cosine_similarity, JsonlVectorStore, SearchHit};
