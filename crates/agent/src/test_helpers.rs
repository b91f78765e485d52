//! Shared test helpers for loop and scheduler tests.

use async_trait::async_trait;
use chorus_core::error::{ProviderError, ToolError};
use chorus_core::provider::{
    CompletionRequest, CompletionResult, CompletionStats, ModelInfo, Provider,
};
use chorus_core::tool::{Tool, ToolCall, ToolRegistry};
use chorus_core::WireDialect;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A mock provider that replays scripted results in order and records every
/// request. Once the script runs out it answers "fallback".
///
/// With a gate, each call first waits for a permit, so tests can hold a
/// persona in the thinking state. With a delay, each call takes that long.
pub struct ScriptedProvider {
    script: Mutex<Vec<Result<CompletionResult, ProviderError>>>,
    seen: Mutex<Vec<CompletionRequest>>,
    started: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    delay: Duration,
    models: Vec<ModelInfo>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<CompletionResult, ProviderError>>) -> Arc<Self> {
        Arc::new(Self::build(script, None, Vec::new()))
    }

    pub fn gated(
        script: Vec<Result<CompletionResult, ProviderError>>,
        gate: Arc<Semaphore>,
    ) -> Arc<Self> {
        Arc::new(Self::build(script, Some(gate), Vec::new()))
    }

    pub fn delayed(
        script: Vec<Result<CompletionResult, ProviderError>>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::build(script, None, Vec::new())
        })
    }

    pub fn with_models(models: Vec<ModelInfo>) -> Arc<Self> {
        Arc::new(Self::build(Vec::new(), None, models))
    }

    fn build(
        script: Vec<Result<CompletionResult, ProviderError>>,
        gate: Option<Arc<Semaphore>>,
        models: Vec<ModelInfo>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().rev().collect()),
            seen: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            gate,
            delay: Duration::ZERO,
            models,
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Calls entered, including ones still waiting at the gate.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, ProviderError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mode = request.dialect();
        self.seen.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Ok(text_result(mode, "fallback")))
    }

    async fn list_models(
        &self,
        _endpoint: &str,
        _api_key: Option<&str>,
    ) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(self.models.clone())
    }
}

/// A plain text answer.
pub fn text_result(mode: WireDialect, text: &str) -> CompletionResult {
    CompletionResult {
        text: Some(text.into()),
        ..CompletionResult::empty(mode)
    }
}

/// A chat-completions answer that stops to call one tool.
pub fn tool_result(id: &str, name: &str) -> CompletionResult {
    CompletionResult {
        text: None,
        tool_use: Some(vec![ToolCall {
            id: id.into(),
            name: name.into(),
            input: json!({"q": "x"}),
        }]),
        raw_content: json!({"role": "assistant", "content": null, "tool_calls": [
            {"id": id, "type": "function", "function": {"name": name, "arguments": "{\"q\":\"x\"}"}}
        ]}),
        stats: Some(CompletionStats::new(50, 5)),
        ..CompletionResult::empty(WireDialect::ChatCompletions)
    }
}

/// A tool with a fixed outcome.
pub struct StaticTool {
    pub name: &'static str,
    pub reply: Result<&'static str, &'static str>,
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<String, ToolError> {
        self.reply
            .map(String::from)
            .map_err(|e| ToolError::Failed(e.to_string()))
    }
}

pub fn registry(tools: Vec<StaticTool>) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    for tool in tools {
        reg.register(Box::new(tool));
    }
    reg
}
