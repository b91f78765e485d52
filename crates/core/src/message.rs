//! Conversation domain types.
//!
//! A conversation is an ordered list of role-tagged entries. Entries carry an
//! internal identity so they can be edited or deleted by id rather than by
//! position; request builders render entries explicitly and never put that
//! identity on the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a persona (entity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonaId(pub String);

impl PersonaId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Internal identity of a conversation entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// The role of an entry in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Tool execution results
    Tool,
}

/// A structured content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Entry payload: plain text, canonical blocks, or a dialect-native value
/// appended verbatim from a previous response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntryContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Native(serde_json::Value),
}

/// A single conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: EntryId,
    pub role: Role,
    pub content: EntryContent,
}

impl ConversationEntry {
    pub fn new(role: Role, content: EntryContent) -> Self {
        Self {
            id: EntryId::new(),
            role,
            content,
        }
    }

    /// Create a user text entry.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, EntryContent::Text(text.into()))
    }

    /// Create an assistant text entry.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, EntryContent::Text(text.into()))
    }

    /// Create an assistant entry holding a dialect-native value.
    pub fn assistant_native(raw: serde_json::Value) -> Self {
        Self::new(Role::Assistant, EntryContent::Native(raw))
    }

    /// Create a tool-result entry. Results keep the order they are given in.
    pub fn tool_results<I, S>(results: I) -> Self
    where
        I: IntoIterator<Item = (S, String)>,
        S: Into<String>,
    {
        let blocks = results
            .into_iter()
            .map(|(id, content)| ContentBlock::ToolResult {
                tool_use_id: id.into(),
                content,
            })
            .collect();
        Self::new(Role::Tool, EntryContent::Blocks(blocks))
    }

    /// Best-effort plain text view of this entry.
    pub fn text(&self) -> Option<String> {
        match &self.content {
            EntryContent::Text(t) => Some(t.clone()),
            EntryContent::Blocks(blocks) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            EntryContent::Native(value) => native_text(value),
        }
    }

    /// Approximate size of this entry in characters, used for token estimates.
    pub fn char_len(&self) -> usize {
        match &self.content {
            EntryContent::Text(t) => t.chars().count(),
            EntryContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.chars().count(),
                    ContentBlock::ToolUse { name, input, .. } => {
                        name.len() + input.to_string().len()
                    }
                    ContentBlock::ToolResult { content, .. } => content.chars().count(),
                })
                .sum(),
            EntryContent::Native(value) => value.to_string().len(),
        }
    }
}

/// Extract text from a native value: a bare string, an array of blocks with
/// `text` fields, or a message object with a string `content`.
fn native_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter(|b| b["type"].as_str() == Some("text"))
                .filter_map(|b| b["text"].as_str())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        serde_json::Value::Object(_) => value["content"].as_str().map(String::from),
        _ => None,
    }
}

/// An ordered conversation with identity-based editing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    entries: Vec<ConversationEntry>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, returning its id.
    pub fn push(&mut self, entry: ConversationEntry) -> EntryId {
        let id = entry.id.clone();
        self.entries.push(entry);
        id
    }

    /// Replace the content of the entry with the given id.
    pub fn edit(&mut self, id: &EntryId, content: EntryContent) -> bool {
        match self.entries.iter_mut().find(|e| &e.id == id) {
            Some(entry) => {
                entry.content = content;
                true
            }
            None => false,
        }
    }

    /// Remove the entry with the given id.
    pub fn remove(&mut self, id: &EntryId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.id != id);
        self.entries.len() < before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The text of the most recent user entry that has any.
    pub fn last_user_text(&self) -> Option<String> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.role == Role::User)
            .find_map(|e| e.text())
    }

    /// Total characters across all entries.
    pub fn char_len(&self) -> usize {
        self.entries.iter().map(|e| e.char_len()).sum()
    }
}

impl From<Vec<ConversationEntry>> for Conversation {
    fn from(entries: Vec<ConversationEntry>) -> Self {
        Self { entries }
    }
}
