//! Per-persona state.
//!
//! [`EntitySession`] is the conversation side: history, chain id, token
//! bookkeeping. It is only ever touched by the loop that owns it.
//! [`EntityHandle`] wraps it with the flags other tasks need to see without
//! waiting for the loop: thinking, abort, and the pending-message inbox.

use chorus_core::message::{Conversation, PersonaId};
use chorus_core::provider::CompletionStats;
use chorus_core::WireDialect;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EntitySession {
    pub persona: PersonaId,

    /// Base prompt plus any wakeup context
    pub system_prompt: String,

    pub model: String,

    pub endpoint: String,

    pub conversation: Conversation,

    /// Chain id for the stateful local dialect
    pub last_response_id: Option<String>,

    /// Most recent real token counts
    pub last_stats: Option<CompletionStats>,

    /// Context window reported by model listing
    pub max_context: Option<u32>,
}

impl EntitySession {
    pub fn new(
        persona: PersonaId,
        system_prompt: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            persona,
            system_prompt: system_prompt.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            conversation: Conversation::new(),
            last_response_id: None,
            last_stats: None,
            max_context: None,
        }
    }

    pub fn dialect(&self) -> WireDialect {
        WireDialect::detect(&self.endpoint)
    }

    /// Point the persona at a different backend. The chain id belongs to the
    /// old server and is dropped.
    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        if endpoint != self.endpoint {
            debug!(persona = %self.persona, endpoint = %endpoint, "Endpoint changed");
            self.endpoint = endpoint;
            self.last_response_id = None;
            self.max_context = None;
        }
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        if model != self.model {
            self.model = model;
            self.last_response_id = None;
            self.max_context = None;
        }
    }

    /// Called after compaction: history and chain are gone.
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.last_response_id = None;
        self.last_stats = None;
    }

    /// Characters in the system prompt and conversation.
    pub fn char_len(&self) -> usize {
        self.system_prompt.chars().count() + self.conversation.char_len()
    }
}

/// Result of offering a message to an entity.
#[derive(Debug, PartialEq, Eq)]
pub enum Admit {
    /// The entity was idle and is now busy with this message
    Begin(String),
    /// The entity is busy; the message waits at this 1-based position
    Queued(usize),
}

#[derive(Debug, Default)]
struct Inbox {
    busy: bool,
    pending: VecDeque<String>,
}

/// Shared handle to one persona.
#[derive(Debug)]
pub struct EntityHandle {
    pub persona: PersonaId,
    abort: Arc<AtomicBool>,
    inbox: Mutex<Inbox>,
    pub session: tokio::sync::Mutex<EntitySession>,
}

impl EntityHandle {
    pub fn new(session: EntitySession) -> Self {
        Self {
            persona: session.persona.clone(),
            abort: Arc::new(AtomicBool::new(false)),
            inbox: Mutex::new(Inbox::default()),
            session: tokio::sync::Mutex::new(session),
        }
    }

    fn inbox(&self) -> MutexGuard<'_, Inbox> {
        // Inbox updates cannot panic midway, so a poisoned lock is still consistent
        self.inbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start on `text` if idle, otherwise queue it.
    pub fn admit(&self, text: String) -> Admit {
        let mut inbox = self.inbox();
        if inbox.busy {
            inbox.pending.push_back(text);
            Admit::Queued(inbox.pending.len())
        } else {
            inbox.busy = true;
            self.clear_abort();
            Admit::Begin(text)
        }
    }

    /// Become busy without a message (isolated calls). `false` if already busy.
    /// Becoming busy clears any stale abort request.
    pub fn try_begin(&self) -> bool {
        let mut inbox = self.inbox();
        if inbox.busy {
            false
        } else {
            inbox.busy = true;
            self.clear_abort();
            true
        }
    }

    /// The next queued message, or go idle when there is none. Both happen
    /// under one lock so a concurrent `admit` never strands a message.
    pub fn next_or_idle(&self) -> Option<String> {
        let mut inbox = self.inbox();
        let next = inbox.pending.pop_front();
        if next.is_none() {
            inbox.busy = false;
        }
        next
    }

    fn force_idle(&self) {
        self.inbox().busy = false;
    }

    pub fn is_thinking(&self) -> bool {
        self.inbox().busy
    }

    pub fn pending(&self) -> usize {
        self.inbox().pending.len()
    }

    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn clear_abort(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }
}

/// Returns the entity to idle if a busy period ends without draining
/// (the future was dropped mid-loop).
pub struct BusyGuard<'a> {
    handle: &'a EntityHandle,
    armed: bool,
}

impl<'a> BusyGuard<'a> {
    pub fn new(handle: &'a EntityHandle) -> Self {
        Self {
            handle,
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.handle.force_idle();
        }
    }
}
