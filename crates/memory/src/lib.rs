//! Memory stores for Chorus personas.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileBackend;
pub use in_memory::InMemoryBackend;

use chorus_core::memory::MemoryEntry;
use chorus_core::message::PersonaId;

/// How many of a persona's most recent memories go into its wakeup.
pub const WAKEUP_LIMIT: usize = 20;

/// The newest `WAKEUP_LIMIT` entries for `persona`, oldest first.
pub(crate) fn recent_for(entries: &[MemoryEntry], persona: &PersonaId) -> Vec<MemoryEntry> {
    let mine: Vec<&MemoryEntry> = entries.iter().filter(|e| &e.persona == persona).collect();
    let skip = mine.len().saturating_sub(WAKEUP_LIMIT);
    mine.into_iter().skip(skip).cloned().collect()
}

pub(crate) fn new_entry(persona: &PersonaId, content: &str, tags: &[&str]) -> MemoryEntry {
    MemoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        persona: persona.clone(),
        content: content.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        created_at: chrono::Utc::now(),
    }
}
