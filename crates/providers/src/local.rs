//! Local-server dialects with a typed `output` array.
//!
//! - Stateless (`/v1/responses`): single shot, only the latest user text is
//!   sent, no tools.
//! - Stateful (`/api/v1/chat`): chained through `previous_response_id`,
//!   tools run server-side through opaque integrations and are reported back
//!   as `tool_call` output items.
//!
//! Neither dialect has a client-driven tool loop, so `tool_use` is always
//! `None` here.

use chorus_core::error::ProviderError;
use chorus_core::provider::{
    CompletionRequest, CompletionResult, CompletionStats, NO_RESPONSE, StreamChunk,
};
use chorus_core::WireDialect;
use serde_json::{Value, json};
use tracing::trace;

use crate::response::{self, token_count};
use crate::sse::SseFrame;
use crate::stream::{Emit, Progress, StreamNormalizer};

/// Build the request body for either local dialect.
pub(crate) fn build_body(
    dialect: WireDialect,
    request: &CompletionRequest,
    stream: bool,
) -> Result<Value, ProviderError> {
    let opts = &request.options;
    let input = last_user_text(request)?;
    let system = opts.system_prompt.as_ref().filter(|s| !s.is_empty());

    let mut body = json!({
        "model": opts.model,
        "input": input,
    });

    if dialect == WireDialect::StatefulLocal {
        match &opts.previous_response_id {
            Some(previous) => body["previous_response_id"] = json!(previous),
            // The server already holds the system prompt for a chain
            None => {
                if let Some(system) = system {
                    body["system_prompt"] = json!(system);
                }
            }
        }
        if opts.store == Some(false) {
            body["store"] = json!(false);
        }
        if !opts.server_integrations.is_empty() {
            body["integrations"] = json!(opts.server_integrations);
        }
    } else {
        if let Some(system) = system {
            body["instructions"] = json!(system);
        }
        body["store"] = json!(false);
        if let Some(max_tokens) = opts.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }
    }

    if stream {
        body["stream"] = json!(true);
    }

    Ok(body)
}

fn last_user_text(request: &CompletionRequest) -> Result<String, ProviderError> {
    request
        .conversation
        .iter()
        .rev()
        .filter(|e| e.role == chorus_core::Role::User)
        .find_map(|e| e.text())
        .ok_or_else(|| ProviderError::NotConfigured("no user message to send".into()))
}

// --- Response parsing ---

/// Parse a complete response body (or the payload carried by a terminal
/// stream event).
pub(crate) fn parse(dialect: WireDialect, body: &Value) -> CompletionResult {
    let output = body["output"].as_array().cloned().unwrap_or_default();

    let mut text: Option<String> = None;
    let mut reasoning: Vec<String> = Vec::new();
    let mut server_calls: Vec<Value> = Vec::new();

    for item in &output {
        match item["type"].as_str() {
            // Earlier message items may be precursors to tool calls
            Some("message") => text = Some(item_text(item)),
            Some("reasoning") | Some("thinking") => {
                let part = item_text(item);
                if !part.is_empty() {
                    reasoning.push(part);
                }
            }
            Some("tool_call") => server_calls.push(item.clone()),
            _ => {}
        }
    }

    let stateful = dialect == WireDialect::StatefulLocal;
    let response_id = if stateful {
        body["response_id"]
            .as_str()
            .or_else(|| body["id"].as_str())
            .map(String::from)
    } else {
        None
    };

    CompletionResult {
        text: Some(text.unwrap_or_else(|| NO_RESPONSE.to_string())),
        tool_use: None,
        raw_content: Value::Array(output),
        mode: dialect,
        reasoning: (!reasoning.is_empty()).then(|| reasoning.join("\n")),
        stats: token_stats(body, stateful),
        response_id,
        server_tool_calls: (stateful && !server_calls.is_empty()).then_some(server_calls),
    }
}

/// Text of an output item: a string `content`, the concatenated `text` of
/// content parts, or else the concatenated summary parts.
fn item_text(item: &Value) -> String {
    if let Some(text) = item["content"].as_str() {
        return text.to_string();
    }
    let joined = concat_parts(&item["content"]);
    if !joined.is_empty() {
        return joined;
    }
    concat_parts(&item["summary"])
}

fn concat_parts(parts: &Value) -> String {
    parts
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|p| p["text"].as_str())
        .collect()
}

/// Token counts from the first populated location, plus performance figures
/// for the stateful dialect.
fn token_stats(body: &Value, with_perf: bool) -> Option<CompletionStats> {
    let locations = [
        (&body["stats"], "input_tokens", "total_output_tokens"),
        (&body["usage"], "input_tokens", "output_tokens"),
        (&body["usage"], "prompt_tokens", "completion_tokens"),
    ];

    let counts = locations.iter().find_map(|(source, input, output)| {
        let (input, output) = (&source[*input], &source[*output]);
        (input.is_u64() || output.is_u64()).then(|| (token_count(input), token_count(output)))
    });

    let (tokens_per_second, time_to_first_token) = if with_perf {
        (
            body["stats"]["tokens_per_second"].as_f64(),
            body["stats"]["time_to_first_token_seconds"].as_f64(),
        )
    } else {
        (None, None)
    };

    if counts.is_none() && tokens_per_second.is_none() && time_to_first_token.is_none() {
        return None;
    }

    let (input_tokens, output_tokens) = counts.unwrap_or((0, 0));
    Some(CompletionStats {
        input_tokens,
        output_tokens,
        tokens_per_second,
        time_to_first_token,
    })
}

// --- Streaming ---

/// Live feed for both local dialects. The terminal event carries the full
/// non-streaming payload, so only the chunk feed is reconstructed here.
#[derive(Debug)]
pub(crate) struct LocalStream {
    dialect: WireDialect,
    text: String,
    reasoning: String,
}

impl LocalStream {
    pub(crate) fn new(dialect: WireDialect) -> Self {
        Self {
            dialect,
            text: String::new(),
            reasoning: String::new(),
        }
    }

    fn text_delta(&mut self, piece: Option<&str>, emit: Emit<'_>) {
        if let Some(piece) = piece.filter(|p| !p.is_empty()) {
            self.text.push_str(piece);
            emit(StreamChunk::Text {
                delta: piece.to_string(),
            });
        }
    }

    fn reasoning_delta(&mut self, piece: Option<&str>, emit: Emit<'_>) {
        if let Some(piece) = piece.filter(|p| !p.is_empty()) {
            self.reasoning.push_str(piece);
            emit(StreamChunk::Reasoning {
                delta: piece.to_string(),
            });
        }
    }

    fn complete(&self, payload: &Value, emit: Emit<'_>) -> Result<Progress, ProviderError> {
        let result = response::parse(self.dialect, payload)?;
        if let Some(stats) = &result.stats {
            emit(StreamChunk::Stats {
                input_tokens: stats.input_tokens,
                output_tokens: stats.output_tokens,
            });
        }
        if let Some(id) = &result.response_id {
            emit(StreamChunk::ResponseId { id: id.clone() });
        }
        Ok(Progress::Finished(result))
    }

    fn on_stateless(
        &mut self,
        name: &str,
        data: &Value,
        emit: Emit<'_>,
    ) -> Result<Progress, ProviderError> {
        match name {
            "response.output_text.delta" => self.text_delta(data["delta"].as_str(), emit),
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                self.reasoning_delta(data["delta"].as_str(), emit)
            }
            "response.completed" => return self.complete(&data["response"], emit),
            "response.failed" => {
                return Err(ProviderError::Backend(error_message(&data["response"])));
            }
            "error" => return Err(ProviderError::Backend(error_message(data))),
            _ => {}
        }
        Ok(Progress::Pending)
    }

    fn on_stateful(
        &mut self,
        name: &str,
        data: &Value,
        emit: Emit<'_>,
    ) -> Result<Progress, ProviderError> {
        match name {
            "message.delta" => self.text_delta(delta_text(data), emit),
            "reasoning.delta" => self.reasoning_delta(delta_text(data), emit),
            "tool_call.start" => {
                let name = ["tool", "name", "tool_name"]
                    .iter()
                    .find_map(|k| data[*k].as_str())
                    .unwrap_or("tool");
                let id = data["tool_call_id"]
                    .as_str()
                    .or_else(|| data["id"].as_str())
                    .map(String::from);
                emit(StreamChunk::ToolStart {
                    id,
                    name: name.to_string(),
                });
            }
            "chat.end" => return self.complete(&data["result"], emit),
            "error" => return Err(ProviderError::Backend(error_message(data))),
            // chat.start, model_load.*, prompt_processing.*, message.start/end,
            // reasoning.start/end, tool_call.arguments/success/failure, ...
            _ => {}
        }
        Ok(Progress::Pending)
    }
}

fn delta_text(data: &Value) -> Option<&str> {
    data["content"].as_str().or_else(|| data["delta"].as_str())
}

fn error_message(data: &Value) -> String {
    data["error"]["message"]
        .as_str()
        .or_else(|| data["error"].as_str())
        .or_else(|| data["message"].as_str())
        .unwrap_or("backend reported an error")
        .to_string()
}

impl StreamNormalizer for LocalStream {
    fn on_frame(&mut self, frame: &SseFrame, emit: Emit<'_>) -> Result<Progress, ProviderError> {
        let Some(data) = frame.json() else {
            trace!(data = %frame.data, "Ignoring unparseable local SSE frame");
            return Ok(Progress::Pending);
        };
        let name = frame.name(Some(&data)).unwrap_or_default();

        match self.dialect {
            WireDialect::StatefulLocal => self.on_stateful(&name, &data, emit),
            _ => self.on_stateless(&name, &data, emit),
        }
    }

    fn finish(&mut self, _emit: Emit<'_>) -> CompletionResult {
        if self.text.is_empty() {
            return CompletionResult::degraded(self.dialect);
        }
        CompletionResult {
            text: Some(std::mem::take(&mut self.text)),
            reasoning: (!self.reasoning.is_empty()).then(|| std::mem::take(&mut self.reasoning)),
            ..CompletionResult::empty(self.dialect)
        }
    }
}
