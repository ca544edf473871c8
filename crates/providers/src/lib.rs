//! LLM provider implementations for Oxbow.
//!
//! All providers implement the `oxbow_core::Provider` trait. The only
//! backend shipped today is Ollama; anything speaking the same chat/stream
//! wire contract can slot in behind the trait.

pub mod ollama;

pub use ollama::OllamaProvider;
