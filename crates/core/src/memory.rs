//! Memory store trait: where personas keep what survives compaction.
//!
//! The scheduler only needs two operations: saving a summary when a
//! conversation is compacted, and waking a persona up with whatever it has
//! remembered so far.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::message::PersonaId;

/// A single remembered note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID for this memory
    pub id: String,

    pub persona: PersonaId,

    pub content: String,

    /// Tags for categorization (e.g. "summary", "note")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,
}

/// What a persona gets back when its session starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wakeup {
    pub memories: Vec<MemoryEntry>,

    /// Ready-to-append system prompt section; empty when nothing is known.
    pub context_block: String,
}

impl Wakeup {
    /// Build a wakeup from memories, newest last.
    pub fn from_memories(memories: Vec<MemoryEntry>) -> Self {
        if memories.is_empty() {
            return Self::default();
        }

        let mut block = String::from("## What you remember\n");
        for (i, mem) in memories.iter().enumerate() {
            block.push_str(&format!(
                "{}. [{}] {}\n",
                i + 1,
                mem.created_at.format("%Y-%m-%d %H:%M"),
                mem.content
            ));
        }
        Self {
            memories,
            context_block: block,
        }
    }
}

/// The memory collaborator.
///
/// Implementations: JSON-lines file, in-memory (for testing).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The store name (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Persist a summary or note for a persona, returning its id.
    async fn save(
        &self,
        persona: &PersonaId,
        content: &str,
        tags: &[&str],
    ) -> std::result::Result<String, MemoryError>;

    /// Everything a persona needs at session start.
    async fn wakeup(&self, persona: &PersonaId) -> std::result::Result<Wakeup, MemoryError>;
}
