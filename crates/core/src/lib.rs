//! # Oxbow Core
//!
//! Domain types, the LLM provider contract, the streaming event protocol,
//! and error definitions for the Oxbow agent orchestration core. This crate
//! carries no I/O dependencies beyond the channel types in its trait
//! signatures — it defines the domain model that all other crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! The provider is a trait here; implementations live in their own crate.
//! This enables:
//! - Swapping backends via configuration
//! - Easy testing with scripted mock providers
//! - Clean dependency graph (all crates depend inward on core)

pub mod document;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use document::Document;
pub use error::{Error, MemoryError, ProviderError, Result, ToolError};
pub use event::{ConfirmationResponse, StreamEvent, StreamStatus};
pub use message::{ChatMessage, Role, ToolCall, ToolFunction};
pub use provider::{ChatRequest, ChatResponse, Choice, ChoiceMessage, Provider};
