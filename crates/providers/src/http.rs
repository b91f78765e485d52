//! HTTP transport over reqwest.
//!
//! One provider serves every dialect: the endpoint URL picks the request
//! builder, the parser and the stream normalizer.

use async_trait::async_trait;
use chorus_core::error::ProviderError;
use chorus_core::provider::{
    ChunkSink, CompletionRequest, CompletionResult, ModelInfo, Provider, StreamChunk,
};
use chorus_core::WireDialect;
use std::time::Duration;
use tracing::{debug, warn};

use crate::request::{BuiltRequest, build};
use crate::{models, response, stream};

/// A provider that speaks to any supported endpoint over HTTP.
pub struct HttpProvider {
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn send(&self, built: &BuiltRequest) -> Result<reqwest::Response, ProviderError> {
        debug!(dialect = %built.dialect, url = %built.url, "Sending request");

        let mut req = self.client.post(&built.url).json(&built.body);
        for (name, value) in &built.headers {
            req = req.header(*name, value);
        }

        let response = req.send().await.map_err(transport_error)?;
        check_status(response).await
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        return Err(ProviderError::RateLimited {
            retry_after_secs: 5,
        });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResult, ProviderError> {
        let built = build(&request, false)?;
        let response = self.send(&built).await?;

        let body: serde_json::Value =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        response::parse(built.dialect, &body)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        on_chunk: ChunkSink<'_>,
    ) -> std::result::Result<CompletionResult, ProviderError> {
        let built = match build(&request, true) {
            Ok(built) => built,
            Err(e) => {
                on_chunk(StreamChunk::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let response = match self.send(&built).await {
            Ok(response) => response,
            Err(e) => {
                on_chunk(StreamChunk::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        stream::drive(built.dialect, response.bytes_stream(), on_chunk).await
    }

    async fn list_models(
        &self,
        endpoint: &str,
        api_key: Option<&str>,
    ) -> std::result::Result<Vec<ModelInfo>, ProviderError> {
        let dialect = WireDialect::detect(endpoint);
        let url = models::models_url(dialect, endpoint);

        let mut req = self.client.get(&url);
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            req = match dialect {
                WireDialect::Messages => req
                    .header("x-api-key", key)
                    .header("anthropic-version", crate::anthropic::ANTHROPIC_VERSION),
                _ => req.header("Authorization", format!("Bearer {key}")),
            };
        }

        let response = req.send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), url = %url, "Model listing unavailable");
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(models::parse_models(&body))
    }
}
