//! Domain event system: what observers see while personas think.
//!
//! The scheduler publishes events as soon as something happens (a persona
//! starts thinking, a message is queued, an abort is requested) even when
//! the loop itself only reacts at its next step boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::message::PersonaId;
use crate::provider::StreamChunk;

/// Why an abort was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The thinking timer expired
    Timeout,
    /// Someone asked for it
    Manual,
}

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A persona entered or left the thinking state
    ThinkingChanged {
        persona: PersonaId,
        thinking: bool,
        timestamp: DateTime<Utc>,
    },

    /// A live stream chunk for a persona's current call
    Chunk {
        persona: PersonaId,
        chunk: StreamChunk,
    },

    /// The model asked for a tool
    ToolRequested {
        persona: PersonaId,
        tool_name: String,
        call_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool finished (successfully or not)
    ToolCompleted {
        persona: PersonaId,
        tool_name: String,
        call_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An abort was requested; the loop stops at its next step
    AbortRequested {
        persona: PersonaId,
        reason: AbortReason,
        timestamp: DateTime<Utc>,
    },

    /// A message arrived while the persona was busy
    MessageQueued {
        persona: PersonaId,
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// The conversation was summarized and cleared
    Compacted {
        persona: PersonaId,
        entries_cleared: usize,
        summary_saved: bool,
        timestamp: DateTime<Utc>,
    },

    /// A loop run finished
    TurnFinished {
        persona: PersonaId,
        steps: u32,
        tool_calls_made: u32,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        persona: Option<PersonaId>,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The persona this event concerns, if any.
    pub fn persona(&self) -> Option<&PersonaId> {
        match self {
            Self::ThinkingChanged { persona, .. }
            | Self::Chunk { persona, .. }
            | Self::ToolRequested { persona, .. }
            | Self::ToolCompleted { persona, .. }
            | Self::AbortRequested { persona, .. }
            | Self::MessageQueued { persona, .. }
            | Self::Compacted { persona, .. }
            | Self::TurnFinished { persona, .. } => Some(persona),
            Self::ErrorOccurred { persona, .. } => persona.as_ref(),
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
