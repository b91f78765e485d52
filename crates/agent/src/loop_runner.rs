//! The agent loop: call → tool dispatch → call, bounded by a step cap.
//!
//! ```text
//!   idle ──► calling ──► tool-dispatch ──► calling ──► ... ──► done
//!               │                                               ▲
//!               └──── abort flag seen at a step boundary ──► aborted
//! ```
//!
//! On the last allowed step the request goes out without tools, so the
//! backend has to answer in prose. A wire failure ends the run with an
//! error; a tool failure becomes an `Error: ...` tool result and the loop
//! carries on.

use chorus_config::AppConfig;
use chorus_core::event::{DomainEvent, EventBus};
use chorus_core::message::{Conversation, ConversationEntry, PersonaId};
use chorus_core::provider::{
    CallOptions, CompletionRequest, CompletionResult, CompletionStats, Provider, StreamChunk,
    ToolDefinition,
};
use chorus_core::tool::{ToolCall, ToolExecutor};
use chorus_core::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::session::EntitySession;

/// Per-call settings shared by every persona.
#[derive(Debug, Clone, Default)]
pub struct LoopSettings {
    /// Tool round-trips per run, already clamped to the ceiling
    pub max_steps: u32,
    pub stream: bool,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub thinking_budget: Option<u32>,
    pub server_integrations: Vec<serde_json::Value>,
    /// Tools never offered to isolated calls
    pub publishing_tools: Vec<String>,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_steps: config.agent.effective_max_steps(),
            stream: config.stream,
            api_key: config.api_key.clone(),
            max_tokens: Some(config.max_tokens),
            thinking_budget: config.thinking_budget,
            server_integrations: config.local_server.integrations.clone(),
            publishing_tools: config.agent.publishing_tools.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The backend answered without asking for more tools
    Completed,
    /// The run used its last step
    StepCapReached,
    /// The abort flag was seen at a step boundary
    Aborted,
}

/// What one loop run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    pub text: Option<String>,
    pub reasoning: Option<String>,
    /// Wire calls made
    pub steps: u32,
    pub tool_calls_made: u32,
    pub outcome: TurnOutcome,
    /// Counts from the last call
    pub stats: Option<CompletionStats>,
}

impl TurnReport {
    fn new() -> Self {
        Self {
            text: None,
            reasoning: None,
            steps: 0,
            tool_calls_made: 0,
            outcome: TurnOutcome::Completed,
            stats: None,
        }
    }

    /// A run stopped before its first call.
    pub(crate) fn aborted() -> Self {
        Self {
            outcome: TurnOutcome::Aborted,
            ..Self::new()
        }
    }

    fn add_reasoning(&mut self, reasoning: &str) {
        if reasoning.is_empty() {
            return;
        }
        match &mut self.reasoning {
            Some(existing) => {
                existing.push_str("\n\n");
                existing.push_str(reasoning);
            }
            None => self.reasoning = Some(reasoning.to_string()),
        }
    }
}

/// Drives one persona's run against a provider.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    admission: Arc<AdmissionController>,
    bus: Arc<EventBus>,
    settings: LoopSettings,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        admission: Arc<AdmissionController>,
        bus: Arc<EventBus>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            provider,
            admission,
            bus,
            settings,
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Run against the persona's own conversation. The last entry should be
    /// the user message being answered.
    pub async fn run(
        &self,
        session: &mut EntitySession,
        abort: &AtomicBool,
        tools: &dyn ToolExecutor,
    ) -> Result<TurnReport, Error> {
        let definitions = tools.definitions();
        let EntitySession {
            persona,
            system_prompt,
            model,
            endpoint,
            conversation,
            last_response_id,
            last_stats,
            ..
        } = session;

        let mut target = Target {
            persona: &*persona,
            endpoint: endpoint.as_str(),
            model: model.as_str(),
            system_prompt: system_prompt.as_str(),
            conversation,
            chain: Some(last_response_id),
            stats: Some(last_stats),
        };
        self.drive(&mut target, abort, tools, definitions).await
    }

    /// Run a one-off prompt in a private buffer. The persona's conversation
    /// and chain id are left untouched, nothing is stored server-side, and
    /// publishing tools are withheld.
    pub async fn run_isolated(
        &self,
        session: &EntitySession,
        prompt: &str,
        abort: &AtomicBool,
        tools: &dyn ToolExecutor,
    ) -> Result<TurnReport, Error> {
        let definitions = tools
            .definitions()
            .into_iter()
            .filter(|d| !self.settings.publishing_tools.contains(&d.name))
            .collect();

        let mut buffer = Conversation::new();
        buffer.push(ConversationEntry::user(prompt));

        let mut target = Target {
            persona: &session.persona,
            endpoint: &session.endpoint,
            model: &session.model,
            system_prompt: &session.system_prompt,
            conversation: &mut buffer,
            chain: None,
            stats: None,
        };
        self.drive(&mut target, abort, tools, definitions).await
    }

    async fn drive(
        &self,
        target: &mut Target<'_>,
        abort: &AtomicBool,
        tools: &dyn ToolExecutor,
        definitions: Vec<ToolDefinition>,
    ) -> Result<TurnReport, Error> {
        let persona = target.persona.clone();
        let dialect = chorus_core::WireDialect::detect(target.endpoint);
        let offered = if dialect.client_tools() { definitions } else { Vec::new() };
        let cap = self.settings.max_steps;
        let mut report = TurnReport::new();

        info!(persona = %persona, dialect = %dialect, cap, "Starting agent loop");

        for step in 0..=cap {
            if abort.swap(false, Ordering::SeqCst) {
                info!(persona = %persona, step, "Abort requested, stopping");
                report.outcome = TurnOutcome::Aborted;
                break;
            }

            let last_step = step == cap;
            let request = self.request(target, &offered, last_step);
            debug!(persona = %persona, step, tools = request.options.tool_names().len(), "Calling model");

            let result = match self.call(&persona, request).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(persona = %persona, step, error = %e, "Model call failed");
                    self.bus.publish(DomainEvent::ErrorOccurred {
                        persona: Some(persona.clone()),
                        error_message: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    return Err(e);
                }
            };

            report.steps += 1;
            report.stats = result.stats.clone().or(report.stats.take());
            if let Some(reasoning) = &result.reasoning {
                report.add_reasoning(reasoning);
            }
            target.record(&result);

            let calls = result.tool_use.clone().unwrap_or_default();
            if calls.is_empty() || last_step {
                if let Some(text) = result.text.as_ref().filter(|t| !t.is_empty()) {
                    target
                        .conversation
                        .push(ConversationEntry::assistant(text.clone()));
                }
                report.text = result.text;
                if last_step {
                    report.outcome = TurnOutcome::StepCapReached;
                }
                break;
            }

            target
                .conversation
                .push(ConversationEntry::assistant_native(result.raw_content));

            let outputs = self.dispatch(&persona, tools, &calls).await;
            report.tool_calls_made += calls.len() as u32;
            target
                .conversation
                .push(ConversationEntry::tool_results(outputs));
        }

        self.bus.publish(DomainEvent::TurnFinished {
            persona: persona.clone(),
            steps: report.steps,
            tool_calls_made: report.tool_calls_made,
            timestamp: chrono::Utc::now(),
        });
        info!(
            persona = %persona,
            steps = report.steps,
            tool_calls = report.tool_calls_made,
            outcome = ?report.outcome,
            "Agent loop finished"
        );
        Ok(report)
    }

    fn request(
        &self,
        target: &Target<'_>,
        offered: &[ToolDefinition],
        last_step: bool,
    ) -> CompletionRequest {
        let isolated = target.chain.is_none();
        let tools = (!last_step && !offered.is_empty()).then(|| offered.to_vec());

        CompletionRequest {
            endpoint: target.endpoint.to_string(),
            conversation: target.conversation.entries().to_vec(),
            options: CallOptions {
                model: target.model.to_string(),
                system_prompt: Some(target.system_prompt.to_string()).filter(|s| !s.is_empty()),
                api_key: self.settings.api_key.clone(),
                tools,
                previous_response_id: target.chain.as_ref().and_then(|c| (**c).clone()),
                store: isolated.then_some(false),
                server_integrations: self.settings.server_integrations.clone(),
                max_tokens: self.settings.max_tokens,
                thinking_budget: self.settings.thinking_budget,
            },
        }
    }

    /// One wire call under a call slot.
    async fn call(
        &self,
        persona: &PersonaId,
        request: CompletionRequest,
    ) -> Result<CompletionResult, Error> {
        let _slot = self.admission.acquire().await?;

        let result = if self.settings.stream {
            let bus = &self.bus;
            let mut forward = |chunk: StreamChunk| {
                bus.publish(DomainEvent::Chunk {
                    persona: persona.clone(),
                    chunk,
                })
            };
            self.provider.stream(request, &mut forward).await
        } else {
            self.provider.complete(request).await
        };

        Ok(result?)
    }

    /// Run the requested tools one after another, in request order.
    async fn dispatch(
        &self,
        persona: &PersonaId,
        tools: &dyn ToolExecutor,
        calls: &[ToolCall],
    ) -> Vec<(String, String)> {
        let mut outputs = Vec::with_capacity(calls.len());

        for call in calls {
            self.bus.publish(DomainEvent::ToolRequested {
                persona: persona.clone(),
                tool_name: call.name.clone(),
                call_id: call.id.clone(),
                timestamp: chrono::Utc::now(),
            });

            let start = std::time::Instant::now();
            let result = tools.execute(&call.name, call.input.clone()).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let output = match &result {
                Ok(output) => output.clone(),
                Err(e) => {
                    warn!(persona = %persona, tool = %call.name, error = %e, "Tool execution failed");
                    format!("Error: {e}")
                }
            };

            self.bus.publish(DomainEvent::ToolCompleted {
                persona: persona.clone(),
                tool_name: call.name.clone(),
                call_id: call.id.clone(),
                success: result.is_ok(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });

            outputs.push((call.id.clone(), output));
        }

        outputs
    }
}

/// The slice of a session one run works on. `chain` and `stats` are `None`
/// for isolated runs.
struct Target<'a> {
    persona: &'a PersonaId,
    endpoint: &'a str,
    model: &'a str,
    system_prompt: &'a str,
    conversation: &'a mut Conversation,
    chain: Option<&'a mut Option<String>>,
    stats: Option<&'a mut Option<CompletionStats>>,
}

impl Target<'_> {
    fn record(&mut self, result: &CompletionResult) {
        if let (Some(stats), Some(slot)) = (&result.stats, self.stats.as_deref_mut()) {
            *slot = Some(stats.clone());
        }
        if result.mode.is_stateful() {
            if let (Some(id), Some(chain)) = (&result.response_id, self.chain.as_deref_mut()) {
                *chain = Some(id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use chorus_core::error::ProviderError;
    use chorus_core::message::{ContentBlock, EntryContent, Role};
    use chorus_core::tool::ToolRegistry;
    use chorus_core::WireDialect;

    fn agent(provider: Arc<ScriptedProvider>, max_steps: u32) -> AgentLoop {
        AgentLoop::new(
            provider,
            Arc::new(AdmissionController::new(1)),
            Arc::new(EventBus::new(64)),
            LoopSettings {
                max_steps,
                publishing_tools: vec!["post_message".into()],
                ..LoopSettings::default()
            },
        )
    }

    fn session(endpoint: &str) -> EntitySession {
        let mut s = EntitySession::new(PersonaId::new("ada"), "You are Ada.", "m", endpoint);
        s.conversation.push(ConversationEntry::user("hello"));
        s
    }

    const CHAT: &str = "http://localhost:1234/v1/chat/completions";

    #[tokio::test]
    async fn plain_answer_appends_text() {
        let provider = ScriptedProvider::new(vec![Ok(text_result(WireDialect::ChatCompletions, "Hi!"))]);
        let mut s = session(CHAT);
        let report = agent(provider.clone(), 5)
            .run(&mut s, &AtomicBool::new(false), &ToolRegistry::new())
            .await
            .unwrap();

        assert_eq!(report.text.as_deref(), Some("Hi!"));
        assert_eq!(report.steps, 1);
        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(s.conversation.len(), 2);
        assert!(provider.requests()[0].options.tools.is_none());
    }

    #[tokio::test]
    async fn tool_round_trip_keeps_call_ids() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_result("call_1", "search")),
            Ok(text_result(WireDialect::ChatCompletions, "Found it")),
        ]);
        let tools = registry(vec![StaticTool { name: "search", reply: Ok("result A") }]);
        let mut s = session(CHAT);
        let report = agent(provider.clone(), 5)
            .run(&mut s, &AtomicBool::new(false), &tools)
            .await
            .unwrap();

        assert_eq!(report.tool_calls_made, 1);
        assert_eq!(report.steps, 2);
        let entries = s.conversation.entries();
        assert_eq!(entries.len(), 4);
        assert!(matches!(entries[1].content, EntryContent::Native(_)));
        assert_eq!(entries[2].role, Role::Tool);
        assert_eq!(
            entries[2].content,
            EntryContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "call_1".into(),
                content: "result A".into()
            }])
        );
        assert_eq!(s.last_stats.as_ref().unwrap().input_tokens, 50);
        assert_eq!(provider.requests()[0].options.tool_names(), vec!["search"]);
    }

    #[tokio::test]
    async fn tool_failure_becomes_error_result() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_result("call_1", "write_file")),
            Ok(text_result(WireDialect::ChatCompletions, "Sorry")),
        ]);
        let tools = registry(vec![StaticTool { name: "write_file", reply: Err("disk full") }]);
        let mut s = session(CHAT);
        let report = agent(provider, 5)
            .run(&mut s, &AtomicBool::new(false), &tools)
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Completed);
        match &s.conversation.entries()[2].content {
            EntryContent::Blocks(blocks) => assert!(matches!(
                &blocks[0],
                ContentBlock::ToolResult { content, .. } if content == "Error: disk full"
            )),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn step_cap_forces_tool_free_final_call() {
        let script = (0..10).map(|i| Ok(tool_result(&format!("c{i}"), "search"))).collect();
        let provider = ScriptedProvider::new(script);
        let tools = registry(vec![StaticTool { name: "search", reply: Ok("more") }]);
        let mut s = session(CHAT);
        let report = agent(provider.clone(), 3)
            .run(&mut s, &AtomicBool::new(false), &tools)
            .await
            .unwrap();

        let requests = provider.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[..3].iter().all(|r| r.options.tools.is_some()));
        assert!(requests[3].options.tools.is_none());
        assert_eq!(report.outcome, TurnOutcome::StepCapReached);
        assert_eq!(report.tool_calls_made, 3);
    }

    #[tokio::test]
    async fn abort_flag_stops_before_calling() {
        let provider = ScriptedProvider::new(vec![]);
        let abort = AtomicBool::new(true);
        let mut s = session(CHAT);
        let report = agent(provider.clone(), 5)
            .run(&mut s, &abort, &ToolRegistry::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, TurnOutcome::Aborted);
        assert_eq!(report.steps, 0);
        assert!(provider.requests().is_empty());
        assert!(!abort.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn wire_failure_ends_run() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Network("refused".into()))]);
        let mut s = session(CHAT);
        let err = agent(provider, 5)
            .run(&mut s, &AtomicBool::new(false), &ToolRegistry::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Network(_))));
        assert_eq!(s.conversation.len(), 1);
    }

    #[tokio::test]
    async fn stateful_dialect_chains_and_skips_client_tools() {
        let endpoint = "http://localhost:1234/api/v1/chat";
        let mut first = text_result(WireDialect::StatefulLocal, "one");
        first.response_id = Some("resp_1".into());
        let mut second = text_result(WireDialect::StatefulLocal, "two");
        second.response_id = Some("resp_2".into());
        let provider = ScriptedProvider::new(vec![Ok(first), Ok(second)]);
        let tools = registry(vec![StaticTool { name: "search", reply: Ok("x") }]);
        let agent = agent(provider.clone(), 5);

        let mut s = session(endpoint);
        agent.run(&mut s, &AtomicBool::new(false), &tools).await.unwrap();
        s.conversation.push(ConversationEntry::user("again"));
        agent.run(&mut s, &AtomicBool::new(false), &tools).await.unwrap();

        let requests = provider.requests();
        assert!(requests[0].options.previous_response_id.is_none());
        assert!(requests[0].options.tools.is_none());
        assert_eq!(requests[1].options.previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(s.last_response_id.as_deref(), Some("resp_2"));
    }

    #[tokio::test]
    async fn isolated_run_leaves_session_alone() {
        let endpoint = "http://localhost:1234/api/v1/chat";
        let mut reply = text_result(WireDialect::StatefulLocal, "checked in");
        reply.response_id = Some("resp_iso".into());
        let provider = ScriptedProvider::new(vec![Ok(reply)]);

        let mut s = session(endpoint);
        s.last_response_id = Some("resp_main".into());
        let before = s.conversation.clone();

        let report = agent(provider.clone(), 5)
            .run_isolated(&s, "Anything new?", &AtomicBool::new(false), &ToolRegistry::new())
            .await
            .unwrap();

        assert_eq!(report.text.as_deref(), Some("checked in"));
        assert_eq!(s.conversation, before);
        assert_eq!(s.last_response_id.as_deref(), Some("resp_main"));

        let request = &provider.requests()[0];
        assert_eq!(request.options.store, Some(false));
        assert!(request.options.previous_response_id.is_none());
        assert_eq!(request.conversation.len(), 1);
    }

    #[tokio::test]
    async fn isolated_run_withholds_publishing_tools() {
        let provider = ScriptedProvider::new(vec![Ok(text_result(WireDialect::ChatCompletions, "ok"))]);
        let tools = registry(vec![
            StaticTool { name: "post_message", reply: Ok("posted") },
            StaticTool { name: "search", reply: Ok("x") },
        ]);
        let s = session(CHAT);
        agent(provider.clone(), 5)
            .run_isolated(&s, "ping", &AtomicBool::new(false), &tools)
            .await
            .unwrap();
        assert_eq!(provider.requests()[0].options.tool_names(), vec!["search"]);
    }

    #[tokio::test]
    async fn streaming_publishes_chunks() {
        let provider = ScriptedProvider::new(vec![Ok(text_result(WireDialect::ChatCompletions, "Hi"))]);
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let agent = AgentLoop::new(
            provider,
            Arc::new(AdmissionController::new(1)),
            bus,
            LoopSettings {
                max_steps: 2,
                stream: true,
                ..LoopSettings::default()
            },
        );
        let mut s = session(CHAT);
        agent
            .run(&mut s, &AtomicBool::new(false), &ToolRegistry::new())
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::Chunk { chunk, .. } = event.as_ref() {
                chunks.push(chunk.clone());
            }
        }
        assert_eq!(
            chunks,
            vec![StreamChunk::Text { delta: "Hi".into() }, StreamChunk::Done]
        );
    }
}
