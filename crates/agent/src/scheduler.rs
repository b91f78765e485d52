//! Per-persona scheduling and message queueing.
//!
//! A message sent to an idle persona starts a loop right away. A message sent
//! while the persona is thinking waits in its FIFO inbox; the task that owns
//! the busy period drains the inbox one message at a time once its own loop
//! finishes. Every message is preceded by a compaction check.

use chorus_config::{AppConfig, ResolvedPersona};
use chorus_core::event::{DomainEvent, EventBus};
use chorus_core::memory::MemoryStore;
use chorus_core::message::{Conversation, ConversationEntry, PersonaId};
use chorus_core::provider::{ModelInfo, Provider, NO_RESPONSE, STREAM_ENDED};
use chorus_core::tool::{ToolExecutor, ToolRegistry};
use chorus_core::Error;
use chorus_tools::{LayeredExecutor, SaveMemoryTool};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::compaction::CompactionPolicy;
use crate::loop_runner::{AgentLoop, LoopSettings, TurnOutcome, TurnReport};
use crate::session::{Admit, BusyGuard, EntityHandle, EntitySession};
use crate::supervisor::Supervisor;

/// What happened to a sent message.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The persona was busy; the message waits at `position` (1-based).
    Queued { position: usize },
    /// The message was answered. `drained` holds the reports for messages
    /// that queued up meanwhile and were answered by this same call.
    Completed {
        report: TurnReport,
        drained: Vec<TurnReport>,
    },
}

pub struct Scheduler {
    entities: RwLock<HashMap<PersonaId, Arc<EntityHandle>>>,
    agent: AgentLoop,
    tools: Arc<dyn ToolExecutor>,
    memory: Arc<dyn MemoryStore>,
    compaction: CompactionPolicy,
    compaction_prompt: String,
    supervisor: Supervisor,
    admission: Arc<AdmissionController>,
    bus: Arc<EventBus>,
}

impl Scheduler {
    pub fn new(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolExecutor>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        let bus = Arc::new(EventBus::default());
        let admission = Arc::new(AdmissionController::new(
            config.admission.max_concurrent_calls,
        ));
        let agent = AgentLoop::new(
            provider,
            admission.clone(),
            bus.clone(),
            LoopSettings::from_config(config),
        );

        Self {
            entities: RwLock::new(HashMap::new()),
            agent,
            tools,
            memory,
            compaction: CompactionPolicy::from_config(&config.compaction),
            compaction_prompt: config.compaction.prompt.clone(),
            supervisor: Supervisor::new(
                bus.clone(),
                Duration::from_secs(config.agent.thinking_timeout_secs),
            ),
            admission,
            bus,
        }
    }

    /// Register every configured persona.
    pub async fn register_all(&self, config: &AppConfig) -> Result<(), Error> {
        for persona in config.resolved_personas() {
            self.register(persona).await?;
        }
        Ok(())
    }

    /// Add a persona. Its wakeup context, if any, is appended to the system
    /// prompt for the life of the session.
    pub async fn register(&self, resolved: ResolvedPersona) -> Result<PersonaId, Error> {
        let persona = PersonaId::new(resolved.name);
        if self.entities.read().await.contains_key(&persona) {
            return Err(Error::config(format!(
                "Persona '{persona}' is already registered"
            )));
        }

        let mut system_prompt = resolved.system_prompt;
        match self.memory.wakeup(&persona).await {
            Ok(wakeup) if !wakeup.context_block.is_empty() => {
                debug!(persona = %persona, memories = wakeup.memories.len(), "Wakeup context loaded");
                if !system_prompt.is_empty() {
                    system_prompt.push_str("\n\n");
                }
                system_prompt.push_str(&wakeup.context_block);
            }
            Ok(_) => {}
            Err(e) => warn!(persona = %persona, error = %e, "Wakeup failed, starting without memories"),
        }

        let session = EntitySession::new(
            persona.clone(),
            system_prompt,
            resolved.model,
            resolved.endpoint,
        );
        self.entities
            .write()
            .await
            .insert(persona.clone(), Arc::new(EntityHandle::new(session)));
        info!(persona = %persona, "Persona registered");
        Ok(persona)
    }

    pub async fn personas(&self) -> Vec<PersonaId> {
        let mut names: Vec<PersonaId> = self.entities.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    async fn handle(&self, persona: &PersonaId) -> Result<Arc<EntityHandle>, Error> {
        self.entities
            .read()
            .await
            .get(persona)
            .cloned()
            .ok_or_else(|| Error::UnknownPersona(persona.to_string()))
    }

    /// Send a user message to `persona`.
    ///
    /// Returns once this message and everything queued behind it has been
    /// answered. Errors from queued messages are logged and published; only
    /// the error for this message is returned.
    pub async fn send(
        &self,
        persona: &PersonaId,
        text: impl Into<String>,
    ) -> Result<SendOutcome, Error> {
        let handle = self.handle(persona).await?;

        let text = match handle.admit(text.into()) {
            Admit::Begin(text) => text,
            Admit::Queued(position) => {
                debug!(persona = %persona, position, "Persona busy, message queued");
                self.bus.publish(DomainEvent::MessageQueued {
                    persona: persona.clone(),
                    position,
                    timestamp: chrono::Utc::now(),
                });
                return Ok(SendOutcome::Queued { position });
            }
        };

        let mut guard = BusyGuard::new(&handle);
        self.thinking(persona, true);

        let result = self.process(&handle, text).await;
        let drained = self.drain(&handle).await;

        guard.disarm();
        self.thinking(persona, false);

        Ok(SendOutcome::Completed {
            report: result?,
            drained,
        })
    }

    /// Run a one-off prompt without touching the persona's conversation.
    /// Fails with [`Error::Busy`] if the persona is thinking.
    pub async fn isolated(&self, persona: &PersonaId, prompt: &str) -> Result<TurnReport, Error> {
        let handle = self.handle(persona).await?;
        if !handle.try_begin() {
            return Err(Error::Busy(persona.to_string()));
        }

        let mut guard = BusyGuard::new(&handle);
        self.thinking(persona, true);

        let result = {
            let session = handle.session.lock().await;
            let abort = handle.abort_flag();
            let _timer = self.supervisor.arm(persona.clone(), abort.clone());
            let result = self
                .agent
                .run_isolated(&session, prompt, &abort, self.tools.as_ref())
                .await;
            handle.clear_abort();
            result
        };
        self.drain(&handle).await;

        guard.disarm();
        self.thinking(persona, false);
        result
    }

    /// Compact now, regardless of the policy. Returns whether history was
    /// cleared.
    pub async fn compact(&self, persona: &PersonaId) -> Result<bool, Error> {
        let handle = self.handle(persona).await?;
        if !handle.try_begin() {
            return Err(Error::Busy(persona.to_string()));
        }

        let mut guard = BusyGuard::new(&handle);
        self.thinking(persona, true);

        let result = {
            let mut session = handle.session.lock().await;
            self.compact_session(&handle, &mut session).await
        };
        self.drain(&handle).await;

        guard.disarm();
        self.thinking(persona, false);
        result
    }

    /// Request a stop at the next step boundary. `false` if the persona is
    /// idle.
    pub async fn abort(&self, persona: &PersonaId) -> Result<bool, Error> {
        let handle = self.handle(persona).await?;
        if !handle.is_thinking() {
            return Ok(false);
        }
        self.supervisor.abort(persona, &handle.abort_flag());
        Ok(true)
    }

    pub async fn is_thinking(&self, persona: &PersonaId) -> Result<bool, Error> {
        Ok(self.handle(persona).await?.is_thinking())
    }

    /// Messages waiting behind the current loop.
    pub async fn pending(&self, persona: &PersonaId) -> Result<usize, Error> {
        Ok(self.handle(persona).await?.pending())
    }

    /// Snapshot of the persona's conversation. Waits for a running loop.
    pub async fn conversation(&self, persona: &PersonaId) -> Result<Conversation, Error> {
        let handle = self.handle(persona).await?;
        let session = handle.session.lock().await;
        Ok(session.conversation.clone())
    }

    pub async fn last_response_id(&self, persona: &PersonaId) -> Result<Option<String>, Error> {
        let handle = self.handle(persona).await?;
        let session = handle.session.lock().await;
        Ok(session.last_response_id.clone())
    }

    /// Takes effect from the next loop.
    pub async fn set_endpoint(&self, persona: &PersonaId, endpoint: &str) -> Result<(), Error> {
        let handle = self.handle(persona).await?;
        handle.session.lock().await.set_endpoint(endpoint);
        Ok(())
    }

    pub async fn set_model(&self, persona: &PersonaId, model: &str) -> Result<(), Error> {
        let handle = self.handle(persona).await?;
        handle.session.lock().await.set_model(model);
        Ok(())
    }

    /// List models once per distinct endpoint and cache each persona's
    /// context window. An endpoint that fails to list is skipped.
    pub async fn refresh_models(&self) -> BTreeMap<String, Vec<ModelInfo>> {
        let handles: Vec<Arc<EntityHandle>> =
            self.entities.read().await.values().cloned().collect();

        let mut endpoints = BTreeMap::new();
        for handle in &handles {
            let endpoint = handle.session.lock().await.endpoint.clone();
            endpoints.entry(endpoint).or_insert_with(Vec::new);
        }

        let api_key = self.agent.settings().api_key.as_deref();
        for (endpoint, models) in endpoints.iter_mut() {
            match self.agent.provider().list_models(endpoint, api_key).await {
                Ok(listed) => *models = listed,
                Err(e) => warn!(endpoint = %endpoint, error = %e, "Model listing failed"),
            }
        }

        for handle in &handles {
            let mut session = handle.session.lock().await;
            let window = endpoints
                .get(&session.endpoint)
                .and_then(|models| models.iter().find(|m| m.id == session.model))
                .and_then(|m| m.max_context);
            if let Some(window) = window {
                debug!(persona = %session.persona, window, "Context window updated");
                session.max_context = Some(window);
            }
        }

        endpoints
    }

    /// Answer one message: compaction check, then a loop run. Each message
    /// gets its own thinking timer, drained ones included.
    async fn process(&self, handle: &EntityHandle, text: String) -> Result<TurnReport, Error> {
        let mut session = handle.session.lock().await;

        if self.compaction.should_compact(&session) {
            match self.compact_session(handle, &mut session).await {
                Ok(true) => {}
                // The abort was aimed at this message, not just the compaction
                Ok(false) => {
                    handle.clear_abort();
                    info!(persona = %handle.persona, "Aborted during compaction, message not sent");
                    return Ok(TurnReport::aborted());
                }
                Err(e) => {
                    warn!(persona = %handle.persona, error = %e, "Compaction failed, keeping history");
                }
            }
        }

        session.conversation.push(ConversationEntry::user(text));

        let abort = handle.abort_flag();
        let result = {
            let _timer = self.supervisor.arm(handle.persona.clone(), abort.clone());
            self.agent.run(&mut session, &abort, self.tools.as_ref()).await
        };
        // A timer that fired after the last step boundary must not leak
        // into the next message
        handle.clear_abort();
        result
    }

    /// Answer queued messages until the inbox is empty, leaving the persona
    /// idle.
    async fn drain(&self, handle: &EntityHandle) -> Vec<TurnReport> {
        let mut reports = Vec::new();
        while let Some(next) = handle.next_or_idle() {
            match self.process(handle, next).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(persona = %handle.persona, error = %e, "Queued message failed"),
            }
        }
        reports
    }

    /// Ask the model to persist a summary, then clear history and chain.
    /// On failure or abort the conversation is restored as it was; an abort
    /// returns `Ok(false)`.
    async fn compact_session(
        &self,
        handle: &EntityHandle,
        session: &mut EntitySession,
    ) -> Result<bool, Error> {
        let persona = session.persona.clone();
        let entries = session.conversation.len();
        let snapshot = session.conversation.clone();
        info!(persona = %persona, entries, "Compacting conversation");

        session
            .conversation
            .push(ConversationEntry::user(self.compaction_prompt.clone()));

        let mut local = ToolRegistry::new();
        local.register(Box::new(SaveMemoryTool::new(
            self.memory.clone(),
            persona.clone(),
        )));
        let tools = LayeredExecutor::new(local, self.tools.clone());

        let abort = handle.abort_flag();
        let report = {
            let _timer = self.supervisor.arm(persona.clone(), abort.clone());
            self.agent.run(session, &abort, &tools).await
        };

        let report = match report {
            Ok(report) if report.outcome != TurnOutcome::Aborted => report,
            Ok(_) => {
                session.conversation = snapshot;
                info!(persona = %persona, "Compaction aborted, keeping history");
                return Ok(false);
            }
            Err(e) => {
                session.conversation = snapshot;
                return Err(e);
            }
        };

        let summary = report
            .text
            .filter(|t| !t.trim().is_empty() && t != STREAM_ENDED && t != NO_RESPONSE);
        let summary_saved = match summary {
            Some(summary) => match self.memory.save(&persona, &summary, &["summary"]).await {
                Ok(id) => {
                    debug!(persona = %persona, id = %id, "Compaction summary saved");
                    true
                }
                Err(e) => {
                    warn!(persona = %persona, error = %e, "Failed to save compaction summary");
                    false
                }
            },
            None => false,
        };

        session.reset();
        self.bus.publish(DomainEvent::Compacted {
            persona,
            entries_cleared: entries,
            summary_saved,
            timestamp: chrono::Utc::now(),
        });
        Ok(true)
    }

    fn thinking(&self, persona: &PersonaId, thinking: bool) {
        self.bus.publish(DomainEvent::ThinkingChanged {
            persona: persona.clone(),
            thinking,
            timestamp: chrono::Utc::now(),
        });
    }
}
