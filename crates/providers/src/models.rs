//! Model listing: where to ask, and a lenient reader for what comes back.

use chorus_core::provider::ModelInfo;
use chorus_core::WireDialect;
use serde_json::Value;

/// The models-list URL for an endpoint.
pub fn models_url(dialect: WireDialect, endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let origin = origin(endpoint);

    match dialect {
        WireDialect::Messages => format!("{origin}/v1/models"),
        WireDialect::ChatCompletions => match endpoint.find("/chat/completions") {
            Some(idx) => format!("{}/models", &endpoint[..idx]),
            None => format!("{origin}/v1/models"),
        },
        WireDialect::StatelessLocal => format!("{origin}/api/v0/models"),
        WireDialect::StatefulLocal => format!("{origin}/api/v1/models"),
    }
}

fn origin(url: &str) -> &str {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(idx) => &url[..after_scheme + idx],
        None => url,
    }
}

/// Read `data[]` or `models[]` entries. Unknown shapes yield nothing rather
/// than an error; embedding models are dropped.
pub fn parse_models(body: &Value) -> Vec<ModelInfo> {
    let entries = body["data"]
        .as_array()
        .or_else(|| body["models"].as_array())
        .or_else(|| body.as_array());

    entries
        .into_iter()
        .flatten()
        .filter(|m| {
            !m["type"]
                .as_str()
                .is_some_and(|t| t.to_ascii_lowercase().contains("embedding"))
        })
        .filter_map(|m| {
            let id = m["id"].as_str().or_else(|| m["key"].as_str())?;
            Some(ModelInfo {
                id: id.to_string(),
                state: model_state(m),
                quantization: m["quantization"]
                    .as_str()
                    .or_else(|| m["quantization"]["name"].as_str())
                    .map(String::from),
                max_context: m["max_context_length"]
                    .as_u64()
                    .map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
            })
        })
        .collect()
}

fn model_state(m: &Value) -> String {
    if let Some(state) = m["state"].as_str() {
        return state.to_string();
    }
    let loaded = m["loaded"].as_bool().unwrap_or(false)
        || m["loaded_instances"]
            .as_array()
            .is_some_and(|instances| !instances.is_empty());
    let state = if loaded { "loaded" } else { "unknown" };
    state.to_string()
}
