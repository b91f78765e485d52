//! Provider trait: the abstraction over model backends.
//!
//! A Provider sends a conversation to a backend speaking one of the
//! [`WireDialect`]s and normalizes the reply into a [`CompletionResult`],
//! either in one piece or as a live feed of [`StreamChunk`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dialect::WireDialect;
use crate::error::ProviderError;
use crate::message::ConversationEntry;
use crate::tool::ToolCall;

/// Text used when a typed-output response has no message item.
pub const NO_RESPONSE: &str = "(no response)";

/// Text used when a stream closes before the backend finished.
pub const STREAM_ENDED: &str = "(stream ended without response)";

/// A tool schema in canonical shape (name / description / input schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,
}

/// Per-call options handed to the request builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallOptions {
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(skip)]
    pub api_key: Option<String>,

    /// `None` means the call is made without tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Chained response id (stateful local dialect only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,

    /// `Some(false)` suppresses server-side persistence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,

    /// Opaque server-side tool integration descriptors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_integrations: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Extended thinking budget (Messages dialect only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

impl CallOptions {
    /// Tools that will actually be offered (empty when none).
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .flatten()
            .map(|t| t.name.as_str())
            .collect()
    }
}

/// One outbound call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub endpoint: String,
    pub conversation: Vec<ConversationEntry>,
    pub options: CallOptions,
}

impl CompletionRequest {
    pub fn dialect(&self) -> WireDialect {
        WireDialect::detect(&self.endpoint)
    }
}

/// Token counts and, where the backend reports them, performance figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionStats {
    pub input_tokens: u32,
    pub output_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_first_token: Option<f64>,
}

impl CompletionStats {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// The single internal shape every dialect is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// `None` only when tools were requested and no prose preceded them
    pub text: Option<String>,

    /// Present only when the backend stopped to invoke tools
    pub tool_use: Option<Vec<ToolCall>>,

    /// Dialect-native assistant content, re-appended verbatim next turn
    pub raw_content: serde_json::Value,

    pub mode: WireDialect,

    pub reasoning: Option<String>,

    pub stats: Option<CompletionStats>,

    pub response_id: Option<String>,

    /// Tool calls executed server-side, surfaced for observability
    pub server_tool_calls: Option<Vec<serde_json::Value>>,
}

impl CompletionResult {
    /// An empty result for `mode`.
    pub fn empty(mode: WireDialect) -> Self {
        Self {
            text: None,
            tool_use: None,
            raw_content: serde_json::Value::Null,
            mode,
            reasoning: None,
            stats: None,
            response_id: None,
            server_tool_calls: None,
        }
    }

    /// A degraded result carrying only a sentinel text.
    pub fn degraded(mode: WireDialect) -> Self {
        Self {
            text: Some(STREAM_ENDED.to_string()),
            ..Self::empty(mode)
        }
    }

    pub fn has_tool_use(&self) -> bool {
        self.tool_use.as_ref().is_some_and(|calls| !calls.is_empty())
    }

    /// The chunk sequence a live stream of this result would have produced.
    pub fn to_chunks(&self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        if let Some(reasoning) = &self.reasoning {
            chunks.push(StreamChunk::Reasoning {
                delta: reasoning.clone(),
            });
        }
        if let Some(text) = self.text.as_ref().filter(|t| !t.is_empty()) {
            chunks.push(StreamChunk::Text { delta: text.clone() });
        }
        for call in self.tool_use.iter().flatten() {
            chunks.push(StreamChunk::ToolStart {
                id: Some(call.id.clone()),
                name: call.name.clone(),
            });
            chunks.push(StreamChunk::ToolDone {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
        if let Some(stats) = &self.stats {
            chunks.push(StreamChunk::Stats {
                input_tokens: stats.input_tokens,
                output_tokens: stats.output_tokens,
            });
        }
        if let Some(id) = &self.response_id {
            chunks.push(StreamChunk::ResponseId { id: id.clone() });
        }
        chunks.push(StreamChunk::Done);
        chunks
    }
}

/// One incremental event of a streaming response.
///
/// Exactly one `Done` or `Error` terminates a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text {
        delta: String,
    },
    Reasoning {
        delta: String,
    },
    ToolStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
    },
    ToolDone {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Stats {
        input_tokens: u32,
        output_tokens: u32,
    },
    ResponseId {
        id: String,
    },
    Done,
    Error {
        message: String,
    },
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// One entry from a models-list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,

    /// e.g. "loaded", "not-loaded", "unknown"
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context: Option<u32>,
}

/// Callback receiving live stream chunks.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(StreamChunk) + Send);

/// The core Provider trait.
///
/// The agent loop calls `complete()` or `stream()` without knowing which
/// dialect the endpoint speaks.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get the complete normalized result.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResult, ProviderError>;

    /// Send a request, feeding live chunks to `on_chunk`.
    ///
    /// Default implementation calls `complete()` and replays the result as
    /// chunks.
    async fn stream(
        &self,
        request: CompletionRequest,
        on_chunk: ChunkSink<'_>,
    ) -> std::result::Result<CompletionResult, ProviderError> {
        match self.complete(request).await {
            Ok(result) => {
                for chunk in result.to_chunks() {
                    on_chunk(chunk);
                }
                Ok(result)
            }
            Err(e) => {
                on_chunk(StreamChunk::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// List chat-capable models served behind `endpoint`.
    async fn list_models(
        &self,
        _endpoint: &str,
        _api_key: Option<&str>,
    ) -> std::result::Result<Vec<ModelInfo>, ProviderError> {
        Ok(Vec::new())
    }
}
