//! Chat-completions dialect (OpenAI-compatible).
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, llama.cpp server and any
//! endpoint exposing `/v1/chat/completions`.
//!
//! Supports:
//! - System prompt as a synthetic leading message
//! - Function calling (`tools` / `tool_calls`, arguments as a JSON string)
//! - Reasoning from `reasoning_content` / `reasoning`, or recovered from the
//!   text by [`crate::extract`] when the backend has no such field

use chorus_core::error::ProviderError;
use chorus_core::message::{ContentBlock, ConversationEntry, EntryContent, Role};
use chorus_core::provider::{
    CompletionRequest, CompletionResult, CompletionStats, StreamChunk, ToolDefinition,
};
use chorus_core::{ToolCall, WireDialect};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::trace;

use crate::extract::extract;
use crate::response::{finalize_text, parse_tool_args};
use crate::sse::SseFrame;
use crate::stream::{Emit, Progress, StreamNormalizer};

/// Build the request body.
pub(crate) fn build_body(request: &CompletionRequest, stream: bool) -> Value {
    let opts = &request.options;
    let mut body = json!({
        "model": opts.model,
        "messages": render_messages(opts.system_prompt.as_deref(), &request.conversation),
    });

    if let Some(max_tokens) = opts.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    if let Some(tools) = opts.tools.as_ref().filter(|t| !t.is_empty()) {
        body["tools"] = json!(to_api_tools(tools));
    }

    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }

    body
}

/// Convert tool definitions to the function-calling shape.
fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
    tools
        .iter()
        .map(|t| ApiToolDefinition {
            r#type: "function".into(),
            function: ApiToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

fn render_messages(system: Option<&str>, entries: &[ConversationEntry]) -> Vec<Value> {
    let mut out = Vec::with_capacity(entries.len() + 1);

    if let Some(system) = system.filter(|s| !s.is_empty()) {
        out.push(json!({ "role": "system", "content": system }));
    }

    for entry in entries {
        let role = match entry.role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };
        match &entry.content {
            EntryContent::Text(text) => out.push(json!({ "role": role, "content": text })),
            EntryContent::Native(raw) if raw.is_object() => out.push(raw.clone()),
            EntryContent::Native(Value::Array(blocks)) if entry.role == Role::Assistant => {
                out.push(blocks_to_message(blocks));
            }
            EntryContent::Native(_) => out.push(json!({
                "role": role,
                "content": entry.text().unwrap_or_default(),
            })),
            EntryContent::Blocks(blocks) => render_blocks(role, blocks, &mut out),
        }
    }

    out
}

/// Canonical blocks: text and tool-use collapse into one message; every tool
/// result becomes its own `role: "tool"` message.
fn render_blocks(role: &str, blocks: &[ContentBlock], out: &mut Vec<Value>) {
    let mut text = Vec::new();
    let mut calls = Vec::new();
    let mut results = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push(t.as_str()),
            ContentBlock::ToolUse { id, name, input } => calls.push(json!({
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": input.to_string() },
            })),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => results.push(json!({
                "role": "tool",
                "tool_call_id": tool_use_id,
                "content": content,
            })),
        }
    }

    if !text.is_empty() || !calls.is_empty() {
        let mut message = json!({ "role": role, "content": text.join("\n") });
        if !calls.is_empty() {
            message["tool_calls"] = Value::Array(calls);
        }
        out.push(message);
    }
    out.extend(results);
}

/// Convert Messages-dialect content blocks (from an earlier endpoint) into
/// one assistant message. Thinking blocks are dropped.
fn blocks_to_message(blocks: &[Value]) -> Value {
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    let calls: Vec<Value> = blocks
        .iter()
        .filter(|b| b["type"] == "tool_use")
        .map(|b| {
            json!({
                "id": b["id"],
                "type": "function",
                "function": { "name": b["name"], "arguments": b["input"].to_string() },
            })
        })
        .collect();

    let mut message = json!({ "role": "assistant", "content": text.join("\n") });
    if !calls.is_empty() {
        message["tool_calls"] = Value::Array(calls);
    }
    message
}

// --- Response parsing ---

/// A tool call as the backend sent it, arguments still a string.
#[derive(Debug, Default)]
struct RawCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Parse a complete response body.
pub(crate) fn parse(body: &Value) -> Result<CompletionResult, ProviderError> {
    let resp: ApiResponse =
        serde_json::from_value(body.clone()).map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse chat completion: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Backend("No choices in response".into()))?;

    let raw_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| RawCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect::<Vec<_>>();

    let reasoning_field = choice
        .message
        .reasoning_content
        .or(choice.message.reasoning);

    Ok(assemble(
        choice.message.content,
        reasoning_field,
        materialize(&raw_calls),
        choice.finish_reason.as_deref(),
        resp.usage.map(|u| CompletionStats::new(u.prompt_tokens, u.completion_tokens)),
    ))
}

fn materialize(raw: &[RawCall]) -> Vec<ToolCall> {
    raw.iter()
        .enumerate()
        .filter(|(_, c)| !c.name.is_empty())
        .map(|(i, c)| ToolCall {
            id: c
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{i}")),
            name: c.name.clone(),
            input: parse_tool_args(&c.arguments),
        })
        .collect()
}

/// Build the unified result. Shared by the parser and the stream normalizer.
fn assemble(
    content: Option<String>,
    reasoning_field: Option<String>,
    calls: Vec<ToolCall>,
    finish_reason: Option<&str>,
    stats: Option<CompletionStats>,
) -> CompletionResult {
    let (text, reasoning) = match reasoning_field.filter(|r| !r.is_empty()) {
        Some(reasoning) => (content.clone(), Some(reasoning)),
        None => match &content {
            Some(raw) => {
                let found = extract(raw);
                (Some(found.text), found.reasoning)
            }
            None => (None, None),
        },
    };

    let mut raw_content = json!({ "role": "assistant", "content": content });
    if !calls.is_empty() {
        raw_content["tool_calls"] = calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.input.to_string() },
                })
            })
            .collect();
    }

    let tool_use = (finish_reason == Some("tool_calls") && !calls.is_empty()).then_some(calls);
    let has_tools = tool_use.is_some();

    CompletionResult {
        text: finalize_text(text, has_tools),
        tool_use,
        raw_content,
        mode: WireDialect::ChatCompletions,
        reasoning,
        stats,
        response_id: None,
        server_tool_calls: None,
    }
}

// --- Streaming ---

/// Incremental state over chat-completion chunks. Tool-call fragments are
/// keyed by their per-call index until the stream ends.
#[derive(Debug, Default)]
pub(crate) struct ChatStream {
    content: Option<String>,
    reasoning: Option<String>,
    tools: BTreeMap<u32, PendingCall>,
    finish_reason: Option<String>,
    stats: Option<CompletionStats>,
}

#[derive(Debug, Default)]
struct PendingCall {
    raw: RawCall,
    started: bool,
}

impl ChatStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn apply(&mut self, chunk: StreamResponse, emit: Emit<'_>) {
        if let Some(usage) = chunk.usage {
            let stats = CompletionStats::new(usage.prompt_tokens, usage.completion_tokens);
            emit(StreamChunk::Stats {
                input_tokens: stats.input_tokens,
                output_tokens: stats.output_tokens,
            });
            self.stats = Some(stats);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };
        let delta = choice.delta;

        if let Some(piece) = delta.reasoning_content.or(delta.reasoning) {
            if !piece.is_empty() {
                self.reasoning.get_or_insert_with(String::new).push_str(&piece);
                emit(StreamChunk::Reasoning { delta: piece });
            }
        }

        if let Some(piece) = delta.content {
            if !piece.is_empty() {
                self.content.get_or_insert_with(String::new).push_str(&piece);
                emit(StreamChunk::Text { delta: piece });
            }
        }

        for fragment in delta.tool_calls.unwrap_or_default() {
            let pending = self.tools.entry(fragment.index).or_default();
            if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                pending.raw.id = Some(id);
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    pending.raw.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    pending.raw.arguments.push_str(&arguments);
                }
            }
            if !pending.started && !pending.raw.name.is_empty() {
                pending.started = true;
                emit(StreamChunk::ToolStart {
                    id: pending.raw.id.clone(),
                    name: pending.raw.name.clone(),
                });
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }
    }

    fn is_empty(&self) -> bool {
        self.content.is_none() && self.reasoning.is_none() && self.tools.is_empty()
    }

    fn result(&mut self, emit: Emit<'_>) -> CompletionResult {
        let raw: Vec<RawCall> = std::mem::take(&mut self.tools)
            .into_values()
            .map(|p| p.raw)
            .collect();
        let calls = materialize(&raw);
        for call in &calls {
            emit(StreamChunk::ToolDone {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }

        let reasoning_seen = self.reasoning.is_some();
        let result = assemble(
            self.content.take(),
            self.reasoning.take(),
            calls,
            self.finish_reason.as_deref(),
            self.stats.clone(),
        );

        // Reasoning recovered from the text was never streamed live
        if !reasoning_seen {
            if let Some(reasoning) = &result.reasoning {
                emit(StreamChunk::Reasoning {
                    delta: reasoning.clone(),
                });
            }
        }
        result
    }
}

impl StreamNormalizer for ChatStream {
    fn on_frame(&mut self, frame: &SseFrame, emit: Emit<'_>) -> Result<Progress, ProviderError> {
        let data = frame.data.trim();
        if data == "[DONE]" {
            return Ok(Progress::Finished(self.result(emit)));
        }

        match serde_json::from_str::<StreamResponse>(data) {
            Ok(chunk) => {
                if let Some(error) = chunk.error.as_ref().filter(|e| !e.is_null()) {
                    let message = error["message"]
                        .as_str()
                        .or_else(|| error.as_str())
                        .unwrap_or("stream error");
                    return Err(ProviderError::Backend(message.to_string()));
                }
                self.apply(chunk, emit);
            }
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
            }
        }
        Ok(Progress::Pending)
    }

    fn finish(&mut self, emit: Emit<'_>) -> CompletionResult {
        if self.is_empty() {
            return CompletionResult::degraded(WireDialect::ChatCompletions);
        }
        self.result(emit)
    }
}

// --- Chat-completions API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ApiFunction,
}

#[derive(Debug, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta. Arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
