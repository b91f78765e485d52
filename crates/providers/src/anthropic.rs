//! Messages dialect (Anthropic-style).
//!
//! - System prompt as a top-level field
//! - Native `tool_use` / `tool_result` content blocks
//! - Extended thinking blocks, re-sent verbatim (with signatures) next turn
//! - Streaming via typed SSE events, one open content block per index
//!
//! Only the first text block becomes the result text, so only that block is
//! fed live as `Text` chunks.

use chorus_core::error::ProviderError;
use chorus_core::message::{ConversationEntry, EntryContent, Role};
use chorus_core::provider::{CompletionRequest, CompletionResult, CompletionStats, StreamChunk};
use chorus_core::{ToolCall, WireDialect};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::trace;

use crate::response::{finalize_text, parse_tool_args, token_count};
use crate::sse::SseFrame;
use crate::stream::{Emit, Progress, StreamNormalizer};

pub(crate) const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Build the request body.
pub(crate) fn build_body(request: &CompletionRequest, stream: bool) -> Value {
    let opts = &request.options;
    let mut body = json!({
        "model": opts.model,
        "max_tokens": opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": render_messages(&request.conversation),
    });

    if let Some(system) = opts.system_prompt.as_ref().filter(|s| !s.is_empty()) {
        body["system"] = json!(system);
    }

    // Canonical tool schemas are already in this dialect's shape
    if let Some(tools) = opts.tools.as_ref().filter(|t| !t.is_empty()) {
        body["tools"] = json!(tools);
    }

    if let Some(budget) = opts.thinking_budget {
        body["thinking"] = json!({
            "type": "enabled",
            "budget_tokens": budget,
        });
    }

    if stream {
        body["stream"] = json!(true);
    }

    body
}

/// Render conversation entries as `messages`. Tool results go as user turns.
fn render_messages(entries: &[ConversationEntry]) -> Vec<Value> {
    entries
        .iter()
        .filter_map(|entry| {
            let role = match entry.role {
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
            };
            let content = match &entry.content {
                EntryContent::Text(text) if text.is_empty() => return None,
                EntryContent::Text(text) => json!(text),
                EntryContent::Blocks(blocks) => json!(blocks),
                EntryContent::Native(raw) if raw.is_array() => raw.clone(),
                EntryContent::Native(raw) => chat_message_to_blocks(raw),
            };
            Some(json!({ "role": role, "content": content }))
        })
        .collect()
}

/// Convert a chat-completions assistant message into content blocks, for
/// conversations that started on another endpoint.
fn chat_message_to_blocks(message: &Value) -> Value {
    let mut blocks = Vec::new();
    if let Some(text) = message["content"].as_str().filter(|t| !t.is_empty()) {
        blocks.push(json!({ "type": "text", "text": text }));
    }
    for call in message["tool_calls"].as_array().into_iter().flatten() {
        blocks.push(json!({
            "type": "tool_use",
            "id": call["id"],
            "name": call["function"]["name"],
            "input": parse_tool_args(call["function"]["arguments"].as_str().unwrap_or("")),
        }));
    }
    Value::Array(blocks)
}

// --- Response parsing ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

/// Parse a complete response body.
pub(crate) fn parse(body: &Value) -> Result<CompletionResult, ProviderError> {
    let resp: MessagesResponse =
        serde_json::from_value(body.clone()).map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse Messages response: {e}"),
        })?;

    let stats = resp
        .usage
        .map(|u| CompletionStats::new(u.input_tokens, u.output_tokens));

    Ok(assemble(resp.content, resp.stop_reason.as_deref(), stats))
}

/// Build the unified result from content blocks. Shared by the parser and
/// the stream normalizer.
fn assemble(
    content: Vec<Value>,
    stop_reason: Option<&str>,
    stats: Option<CompletionStats>,
) -> CompletionResult {
    let mut text: Option<String> = None;
    let mut reasoning = String::new();
    let mut calls = Vec::new();

    for block in &content {
        match serde_json::from_value::<ResponseBlock>(block.clone()) {
            Ok(ResponseBlock::Text { text: t }) => {
                if text.is_none() {
                    text = Some(t);
                }
            }
            Ok(ResponseBlock::ToolUse { id, name, input }) => {
                let input = if input.is_object() { input } else { json!({}) };
                calls.push(ToolCall { id, name, input });
            }
            Ok(ResponseBlock::Thinking { thinking }) => reasoning.push_str(&thinking),
            Ok(ResponseBlock::Other) | Err(_) => {}
        }
    }

    let tool_use = (stop_reason == Some("tool_use") && !calls.is_empty()).then_some(calls);
    let has_tools = tool_use.is_some();

    CompletionResult {
        text: finalize_text(text, has_tools),
        tool_use,
        raw_content: Value::Array(content),
        mode: WireDialect::Messages,
        reasoning: (!reasoning.is_empty()).then_some(reasoning),
        stats,
        response_id: None,
        server_tool_calls: None,
    }
}

// --- Streaming ---

/// State of one content block, keyed by its index.
#[derive(Debug)]
enum Block {
    Text(String),
    Thinking { thinking: String, signature: String },
    ToolUse { id: String, name: String, json: String, closed: bool },
    Other(Value),
}

impl Block {
    fn open(start: &Value) -> Self {
        match start["type"].as_str() {
            Some("text") => Block::Text(start["text"].as_str().unwrap_or("").to_string()),
            Some("thinking") => Block::Thinking {
                thinking: start["thinking"].as_str().unwrap_or("").to_string(),
                signature: start["signature"].as_str().unwrap_or("").to_string(),
            },
            Some("tool_use") => Block::ToolUse {
                id: start["id"].as_str().unwrap_or("").to_string(),
                name: start["name"].as_str().unwrap_or("").to_string(),
                json: String::new(),
                closed: false,
            },
            _ => Block::Other(start.clone()),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Block::Text(text) => json!({ "type": "text", "text": text }),
            Block::Thinking {
                thinking,
                signature,
            } => {
                let mut block = json!({ "type": "thinking", "thinking": thinking });
                if !signature.is_empty() {
                    block["signature"] = json!(signature);
                }
                block
            }
            Block::ToolUse { id, name, json, .. } => json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": parse_tool_args(json),
            }),
            Block::Other(raw) => raw.clone(),
        }
    }
}

/// Incremental state machine over Messages SSE events.
#[derive(Debug, Default)]
pub(crate) struct MessagesStream {
    blocks: BTreeMap<usize, Block>,
    /// Index of the text block that becomes the result text
    shown_text: Option<usize>,
    stop_reason: Option<String>,
    stats: Option<CompletionStats>,
}

impl MessagesStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn close_block(&mut self, index: usize, emit: Emit<'_>) {
        if let Some(Block::ToolUse {
            id,
            name,
            json,
            closed,
        }) = self.blocks.get_mut(&index)
        {
            if !*closed {
                *closed = true;
                emit(StreamChunk::ToolDone {
                    id: id.clone(),
                    name: name.clone(),
                    input: parse_tool_args(json),
                });
            }
        }
    }

    /// Whether text at `index` is the result text. The first text block to
    /// arrive claims it.
    fn claims_text(&mut self, index: usize) -> bool {
        *self.shown_text.get_or_insert(index) == index
    }

    fn result(&self) -> CompletionResult {
        let content = self.blocks.values().map(Block::to_value).collect();
        assemble(content, self.stop_reason.as_deref(), self.stats.clone())
    }
}

impl StreamNormalizer for MessagesStream {
    fn on_frame(&mut self, frame: &SseFrame, emit: Emit<'_>) -> Result<Progress, ProviderError> {
        let Some(event) = frame.json() else {
            trace!(data = %frame.data, "Ignoring unparseable Messages SSE frame");
            return Ok(Progress::Pending);
        };
        let index = event["index"].as_u64().unwrap_or(0) as usize;

        match frame.name(Some(&event)).as_deref().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.stats = Some(CompletionStats::new(
                    token_count(&usage["input_tokens"]),
                    token_count(&usage["output_tokens"]),
                ));
            }
            "content_block_start" => {
                let block = Block::open(&event["content_block"]);
                if let Block::ToolUse { id, name, .. } = &block {
                    emit(StreamChunk::ToolStart {
                        id: Some(id.clone()),
                        name: name.clone(),
                    });
                }
                if let Block::Text(text) = &block {
                    if self.claims_text(index) && !text.is_empty() {
                        emit(StreamChunk::Text { delta: text.clone() });
                    }
                }
                self.blocks.insert(index, block);
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                let shown = delta["type"] == "text_delta" && self.claims_text(index);
                let block = self
                    .blocks
                    .entry(index)
                    .or_insert_with(|| match delta["type"].as_str() {
                        Some("thinking_delta") | Some("signature_delta") => Block::Thinking {
                            thinking: String::new(),
                            signature: String::new(),
                        },
                        _ => Block::Text(String::new()),
                    });

                match (delta["type"].as_str().unwrap_or(""), block) {
                    ("text_delta", Block::Text(text)) => {
                        if let Some(piece) = delta["text"].as_str() {
                            text.push_str(piece);
                            if shown {
                                emit(StreamChunk::Text {
                                    delta: piece.to_string(),
                                });
                            }
                        }
                    }
                    ("thinking_delta", Block::Thinking { thinking, .. }) => {
                        if let Some(piece) = delta["thinking"].as_str() {
                            thinking.push_str(piece);
                            emit(StreamChunk::Reasoning {
                                delta: piece.to_string(),
                            });
                        }
                    }
                    ("signature_delta", Block::Thinking { signature, .. }) => {
                        if let Some(piece) = delta["signature"].as_str() {
                            signature.push_str(piece);
                        }
                    }
                    ("input_json_delta", Block::ToolUse { json, .. }) => {
                        if let Some(partial) = delta["partial_json"].as_str() {
                            json.push_str(partial);
                        }
                    }
                    (kind, _) => trace!(kind, index, "Delta does not match open block"),
                }
            }
            "content_block_stop" => self.close_block(index, emit),
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                let usage = &event["usage"];
                if usage.is_object() {
                    let stats = self.stats.get_or_insert_with(CompletionStats::default);
                    if usage["input_tokens"].is_u64() {
                        stats.input_tokens = token_count(&usage["input_tokens"]);
                    }
                    if usage["output_tokens"].is_u64() {
                        stats.output_tokens = token_count(&usage["output_tokens"]);
                    }
                    emit(StreamChunk::Stats {
                        input_tokens: stats.input_tokens,
                        output_tokens: stats.output_tokens,
                    });
                }
            }
            "message_stop" => return Ok(Progress::Finished(self.result())),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("stream error")
                    .to_string();
                return Err(ProviderError::Backend(message));
            }
            _ => {} // ping and unknown events
        }

        Ok(Progress::Pending)
    }

    fn finish(&mut self, emit: Emit<'_>) -> CompletionResult {
        if self.blocks.is_empty() {
            return CompletionResult::degraded(WireDialect::Messages);
        }
        let open: Vec<usize> = self.blocks.keys().copied().collect();
        for index in open {
            self.close_block(index, emit);
        }
        self.result()
    }
}
