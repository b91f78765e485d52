//! Save-memory tool: lets a persona persist a note in its own words.
//!
//! Offered during compaction so the model can store what should survive the
//! history being cleared.

use async_trait::async_trait;
use chorus_core::error::ToolError;
use chorus_core::memory::MemoryStore;
use chorus_core::message::PersonaId;
use chorus_core::tool::Tool;
use std::sync::Arc;
use tracing::debug;

pub const SAVE_MEMORY: &str = "save_memory";

/// Writes to one persona's memory.
pub struct SaveMemoryTool {
    store: Arc<dyn MemoryStore>,
    persona: PersonaId,
}

impl SaveMemoryTool {
    pub fn new(store: Arc<dyn MemoryStore>, persona: PersonaId) -> Self {
        Self { store, persona }
    }
}

#[async_trait]
impl Tool for SaveMemoryTool {
    fn name(&self) -> &str {
        SAVE_MEMORY
    }

    fn description(&self) -> &str {
        "Save a note to your long-term memory. Notes are shown to you at the start \
         of every future session, so keep them short and factual."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The note to remember"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional tags, e.g. [\"preference\"]"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        let content = input["content"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let tags: Vec<&str> = input["tags"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|t| t.as_str())
            .collect();

        let id = self
            .store
            .save(&self.persona, content, &tags)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        debug!(persona = %self.persona, id = %id, "Note saved by tool");
        Ok(format!("Saved to memory ({id})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_memory::InMemoryBackend;
    use serde_json::json;

    #[tokio::test]
    async fn saves_under_persona() {
        let store = InMemoryBackend::new();
        let tool = SaveMemoryTool::new(Arc::new(store.clone()), PersonaId::new("ada"));

        let out = tool
            .execute(json!({"content": "  Likes tea  ", "tags": ["preference", 3]}))
            .await
            .unwrap();
        assert!(out.starts_with("Saved to memory"));

        let entries = store.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "Likes tea");
        assert_eq!(entries[0].tags, vec!["preference".to_string()]);
        assert_eq!(entries[0].persona, PersonaId::new("ada"));
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let tool = SaveMemoryTool::new(Arc::new(InMemoryBackend::new()), PersonaId::new("ada"));
        let err = tool.execute(json!({"content": "   "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
