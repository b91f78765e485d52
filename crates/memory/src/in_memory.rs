//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chorus_core::error::MemoryError;
use chorus_core::memory::{MemoryEntry, MemoryStore, Wakeup};
use chorus_core::message::PersonaId;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{new_entry, recent_for};

/// Keeps memories in a Vec for the lifetime of the process.
#[derive(Clone)]
pub struct InMemoryBackend {
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Every stored entry, in insertion order.
    pub async fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.read().await.clone()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryBackend {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save(
        &self,
        persona: &PersonaId,
        content: &str,
        tags: &[&str],
    ) -> Result<String, MemoryError> {
        let entry = new_entry(persona, content, tags);
        let id = entry.id.clone();
        self.entries.write().await.push(entry);
        Ok(id)
    }

    async fn wakeup(&self, persona: &PersonaId) -> Result<Wakeup, MemoryError> {
        let entries = self.entries.read().await;
        Ok(Wakeup::from_memories(recent_for(&entries, persona)))
    }
}
