//! File-based store: persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded `MemoryEntry`. Saves append a single line;
//! the file is human-inspectable and needs no external service.
//!
//! Storage location: `~/.chorus/memories.jsonl` unless configured.

use async_trait::async_trait;
use chorus_core::error::MemoryError;
use chorus_core::memory::{MemoryEntry, MemoryStore, Wakeup};
use chorus_core::message::PersonaId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{new_entry, recent_for};

/// A file-backed memory store using JSONL (one JSON object per line).
///
/// Entries are loaded into memory on creation; each save appends to disk
/// before it becomes visible to readers.
pub struct FileBackend {
    path: PathBuf,
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl FileBackend {
    /// Open the store at `path`. A missing file starts empty and is created
    /// on first save.
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "File memory store loaded");
        Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<MemoryEntry> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MemoryEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted memory entry");
                    None
                }
            })
            .collect()
    }

    async fn append(&self, entry: &MemoryEntry) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let mut line = serde_json::to_string(entry).map_err(|e| {
            MemoryError::Storage(format!("Failed to serialize memory entry: {e}"))
        })?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open memory file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(
        &self,
        persona: &PersonaId,
        content: &str,
        tags: &[&str],
    ) -> Result<String, MemoryError> {
        let entry = new_entry(persona, content, tags);
        let id = entry.id.clone();

        // Hold the write lock across the append so lines never interleave
        let mut entries = self.entries.write().await;
        self.append(&entry).await?;
        entries.push(entry);

        debug!(persona = %persona, id = %id, "Memory saved");
        Ok(id)
    }

    async fn wakeup(&self, persona: &PersonaId) -> Result<Wakeup, MemoryError> {
        let entries = self.entries.read().await;
        Ok(Wakeup::from_memories(recent_for(&entries, persona)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_path() -> PathBuf {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        drop(tmp);
        path
    }

    #[tokio::test]
    async fn save_persists_across_reload() {
        let path = temp_path();
        let ada = PersonaId::new("ada");

        let mem = FileBackend::new(path.clone());
        let id = mem.save(&ada, "Summary: discussed Rust", &["summary"]).await.unwrap();
        assert!(!id.is_empty());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("discussed Rust"));

        let reloaded = FileBackend::new(path);
        let wakeup = reloaded.wakeup(&ada).await.unwrap();
        assert_eq!(wakeup.memories.len(), 1);
        assert_eq!(wakeup.memories[0].id, id);
    }

    #[tokio::test]
    async fn creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memories.jsonl");
        let mem = FileBackend::new(path.clone());
        mem.save(&PersonaId::new("ada"), "hello", &[]).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mem = FileBackend::new(dir.path().join("none.jsonl"));
        let wakeup = mem.wakeup(&PersonaId::new("ada")).await.unwrap();
        assert!(wakeup.memories.is_empty());
    }

    #[tokio::test]
    async fn skips_corrupted_lines() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"{{"id":"1","persona":"ada","content":"valid","created_at":"2026-01-01T00:00:00Z"}}"#
        )
        .unwrap();
        writeln!(tmp, "this is not json").unwrap();
        writeln!(
            tmp,
            r#"{{"id":"2","persona":"ada","content":"also valid","tags":["note"],"created_at":"2026-01-02T00:00:00Z"}}"#
        )
        .unwrap();

        let mem = FileBackend::new(tmp.path().to_path_buf());
        let wakeup = mem.wakeup(&PersonaId::new("ada")).await.unwrap();
        assert_eq!(wakeup.memories.len(), 2);
        assert!(wakeup.context_block.contains("2. [2026-01-02 00:00] also valid"));
    }
}
