//! # Chorus Core
//!
//! Domain types, traits, and error definitions for the Chorus multi-persona
//! agent runtime. This crate has **no transport dependencies**. It defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here. Implementations live in
//! their respective crates:
//! - [`Provider`]: model backends (`chorus-providers`)
//! - [`ToolExecutor`] / [`Tool`]: tool execution (`chorus-tools`)
//! - [`MemoryStore`]: summaries and wakeup context (`chorus-memory`)

pub mod dialect;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use dialect::WireDialect;
pub use error::{Error, MemoryError, ProviderError, Result, ToolError};
pub use event::{AbortReason, DomainEvent, EventBus};
pub use memory::{MemoryEntry, MemoryStore, Wakeup};
pub use message::{
    ContentBlock, Conversation, ConversationEntry, EntryContent, EntryId, PersonaId, Role,
};
pub use provider::{
    CallOptions, ChunkSink, CompletionRequest, CompletionResult, CompletionStats, ModelInfo,
    Provider, StreamChunk, ToolDefinition, NO_RESPONSE, STREAM_ENDED,
};
pub use tool::{Tool, ToolCall, ToolExecutor, ToolRegistry};
