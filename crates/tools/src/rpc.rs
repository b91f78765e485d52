//! RPC tool executor: runs tools in a separate local process over HTTP.
//!
//! Protocol:
//! - `GET  {base}/tools`   → `{"tools": [{name, description, input_schema}]}`
//! - `POST {base}/execute` with `{"name", "args"}` → `{"result": "..."}` or
//!   `{"error": "..."}`
//!
//! Failures of any kind come back as a [`ToolError`] whose message the agent
//! loop turns into an `Error: ...` tool result.

use async_trait::async_trait;
use chorus_core::error::ToolError;
use chorus_core::provider::ToolDefinition;
use chorus_core::tool::ToolExecutor;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub struct RpcToolExecutor {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    definitions: Vec<ToolDefinition>,
}

#[derive(Debug, Deserialize)]
struct ToolList {
    #[serde(default)]
    tools: Vec<RemoteTool>,
}

#[derive(Debug, Deserialize)]
struct RemoteTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "parameters")]
    input_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ExecuteReply {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RpcToolExecutor {
    /// An executor with a fixed tool list and no discovery call.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        definitions: Vec<ToolDefinition>,
    ) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Failed(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            definitions,
        })
    }

    /// Connect and discover the tool list.
    pub async fn connect(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let mut executor = Self::new(base_url, timeout, Vec::new())?;
        executor.definitions = executor.discover().await?;
        debug!(
            url = %executor.base_url,
            tools = executor.definitions.len(),
            "Tool executor connected"
        );
        Ok(executor)
    }

    async fn discover(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let url = format!("{}/tools", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("Tool executor unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ToolError::Failed(format!(
                "Tool discovery failed with status {}",
                response.status().as_u16()
            )));
        }

        let list: ToolList = response
            .json()
            .await
            .map_err(|e| ToolError::Failed(format!("Invalid tool list: {e}")))?;

        Ok(list
            .tools
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name,
                description: t.description,
                input_schema: t
                    .input_schema
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            })
            .collect())
    }
}

#[async_trait]
impl ToolExecutor for RpcToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }

    async fn execute(&self, name: &str, input: serde_json::Value) -> Result<String, ToolError> {
        let url = format!("{}/execute", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "name": name, "args": input }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout {
                        tool_name: name.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    ToolError::Failed(format!("Tool executor unreachable: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(ToolError::NotFound(name.to_string()));
        }
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            warn!(tool = name, status, "Tool executor returned error");
            return Err(ToolError::Failed(if body.is_empty() {
                format!("tool executor returned status {status}")
            } else {
                body
            }));
        }

        let reply: ExecuteReply = response
            .json()
            .await
            .map_err(|e| ToolError::Failed(format!("Invalid tool reply: {e}")))?;

        if let Some(error) = reply.error {
            return Err(ToolError::Failed(error));
        }

        Ok(match reply.result {
            Some(serde_json::Value::String(text)) => text,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
    }
}
