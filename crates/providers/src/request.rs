//! Request building: one dialect-correct `{url, headers, body}` per call.

use chorus_core::error::ProviderError;
use chorus_core::provider::CompletionRequest;
use chorus_core::WireDialect;
use serde_json::Value;

use crate::anthropic::{self, ANTHROPIC_VERSION};
use crate::{local, openai_compat};

/// A fully built outbound call.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub dialect: WireDialect,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

/// Build the outbound call for `request`. The dialect is derived from the
/// endpoint here and nowhere else on this path.
///
/// Missing endpoint, model or conversation is a configuration error and is
/// rejected before anything is built.
pub fn build(request: &CompletionRequest, stream: bool) -> Result<BuiltRequest, ProviderError> {
    if request.endpoint.trim().is_empty() {
        return Err(ProviderError::NotConfigured("endpoint is not set".into()));
    }
    if request.options.model.trim().is_empty() {
        return Err(ProviderError::NotConfigured("model is not set".into()));
    }
    if request.conversation.is_empty() {
        return Err(ProviderError::NotConfigured("conversation is empty".into()));
    }

    let dialect = request.dialect();
    let body = match dialect {
        WireDialect::Messages => anthropic::build_body(request, stream),
        WireDialect::ChatCompletions => openai_compat::build_body(request, stream),
        WireDialect::StatelessLocal | WireDialect::StatefulLocal => {
            local::build_body(dialect, request, stream)?
        }
    };

    let mut headers = vec![("content-type", "application/json".to_string())];
    let api_key = request
        .options
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty());

    match dialect {
        WireDialect::Messages => {
            if let Some(key) = api_key {
                headers.push(("x-api-key", key.to_string()));
            }
            headers.push(("anthropic-version", ANTHROPIC_VERSION.to_string()));
        }
        _ => {
            if let Some(key) = api_key {
                headers.push(("authorization", format!("Bearer {key}")));
            }
        }
    }

    if stream {
        headers.push(("accept", "text/event-stream".to_string()));
    }

    Ok(BuiltRequest {
        dialect,
        url: request.endpoint.trim().to_string(),
        headers,
        body,
    })
}
