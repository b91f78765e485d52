//! Result parsing: one complete response body to one [`CompletionResult`].

use chorus_core::error::ProviderError;
use chorus_core::provider::CompletionResult;
use chorus_core::WireDialect;
use serde_json::{Value, json};

use crate::{anthropic, local, openai_compat};

/// Parse a non-streaming response body for `dialect`.
pub fn parse(dialect: WireDialect, body: &Value) -> Result<CompletionResult, ProviderError> {
    if let Some(message) = in_band_error(body) {
        return Err(ProviderError::Backend(message));
    }

    match dialect {
        WireDialect::Messages => anthropic::parse(body),
        WireDialect::ChatCompletions => openai_compat::parse(body),
        WireDialect::StatelessLocal | WireDialect::StatefulLocal => {
            Ok(local::parse(dialect, body))
        }
    }
}

/// An error reported inside a 2xx body.
fn in_band_error(body: &Value) -> Option<String> {
    let error = body.get("error").filter(|e| !e.is_null())?;
    Some(
        error["message"]
            .as_str()
            .or_else(|| error.as_str())
            .unwrap_or("backend reported an error")
            .to_string(),
    )
}

/// Parse tool-call arguments. Anything that is not a JSON object becomes `{}`.
pub(crate) fn parse_tool_args(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => value,
        _ => json!({}),
    }
}

/// A token count from a JSON number. Absent reads as 0; counts beyond
/// `u32` saturate.
pub(crate) fn token_count(value: &Value) -> u32 {
    value
        .as_u64()
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

/// `None` only when tools were requested and no prose preceded them;
/// otherwise always some text, possibly empty.
pub(crate) fn finalize_text(text: Option<String>, has_tools: bool) -> Option<String> {
    if has_tools {
        text.filter(|t| !t.is_empty())
    } else {
        Some(text.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_token_counts_saturate() {
        assert_eq!(token_count(&json!(12)), 12);
        assert_eq!(token_count(&json!(5_000_000_000u64)), u32::MAX);
        assert_eq!(token_count(&Value::Null), 0);
    }

    #[test]
    fn bad_tool_args_degrade_to_empty_object() {
        assert_eq!(parse_tool_args(r#"{"q":"rust"}"#)["q"], "rust");
        assert_eq!(parse_tool_args("{not json"), json!({}));
        assert_eq!(parse_tool_args(""), json!({}));
        assert_eq!(parse_tool_args("[1,2]"), json!({}));
    }

    #[test]
    fn text_normalization() {
        assert_eq!(finalize_text(None, false).as_deref(), Some(""));
        assert_eq!(finalize_text(None, true), None);
        assert_eq!(finalize_text(Some(String::new()), true), None);
        assert_eq!(finalize_text(Some("hi".into()), true).as_deref(), Some("hi"));
    }

    #[test]
    fn in_band_errors_surface_as_backend_errors() {
        let body = json!({"error": {"message": "model not loaded"}});
        let err = parse(WireDialect::ChatCompletions, &body).unwrap_err();
        assert!(matches!(err, ProviderError::Backend(m) if m == "model not loaded"));

        let body = json!({"error": null, "output": []});
        assert!(parse(WireDialect::StatelessLocal, &body).is_ok());
    }
}
