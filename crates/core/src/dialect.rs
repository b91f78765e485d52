//! Wire dialects and the mode detector.
//!
//! A dialect is a pure function of the endpoint URL. It is decided once per
//! outbound call, and the streaming path, the non-streaming path and any
//! pre-dispatch validation all derive it the same way.

use serde::{Deserialize, Serialize};

/// The fixed set of wire protocols a backend may speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireDialect {
    /// Messages API: content blocks, thinking blocks, native `tool_use`.
    Messages,
    /// OpenAI-style chat completions with function calling.
    ChatCompletions,
    /// Stateless single-shot local endpoint with a typed `output` array.
    StatelessLocal,
    /// Stateful local chat: response-id chaining, server-side tool integrations.
    StatefulLocal,
}

impl WireDialect {
    /// Classify an endpoint URL. Total: unmatched URLs are `ChatCompletions`.
    pub fn detect(url: &str) -> Self {
        let lower = url.trim().to_ascii_lowercase();
        let (host, path) = split_host_path(&lower);

        if path.contains("/v1/messages") || host.contains("anthropic.com") {
            Self::Messages
        } else if path.contains("/api/v1/chat") {
            Self::StatefulLocal
        } else if path.contains("/v1/responses") {
            Self::StatelessLocal
        } else {
            Self::ChatCompletions
        }
    }

    /// Whether the client drives the tool loop for this dialect.
    pub fn client_tools(self) -> bool {
        matches!(self, Self::Messages | Self::ChatCompletions)
    }

    /// Whether responses can be chained through a server-side response id.
    pub fn is_stateful(self) -> bool {
        matches!(self, Self::StatefulLocal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::ChatCompletions => "chat_completions",
            Self::StatelessLocal => "stateless_local",
            Self::StatefulLocal => "stateful_local",
        }
    }
}

impl std::fmt::Display for WireDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split `scheme://host:port/path?query` into (host, path). Tolerates
/// missing schemes and paths.
fn split_host_path(url: &str) -> (&str, &str) {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    }
}
