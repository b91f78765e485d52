//! Tool seams: what the agent loop calls when the model requests a tool.
//!
//! The loop only sees a [`ToolExecutor`]: something that lists tool schemas
//! and turns `(name, input)` into text or an error. A [`ToolRegistry`] of
//! in-process [`Tool`]s is one executor; a remote RPC endpoint is another.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned id; must round-trip into the matching tool result
    pub id: String,

    pub name: String,

    /// Structured arguments (`{}` when the backend sent unparseable JSON)
    pub input: serde_json::Value,
}

/// Executes tools on behalf of the agent loop.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Schemas of every tool this executor can run.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one tool. Errors carry a human-readable message.
    async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> std::result::Result<String, ToolError>;
}

/// A single in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "save_memory").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of in-process tools, ordered by name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> std::result::Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
            Ok(input["text"].as_str().unwrap_or("").to_string())
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].input_schema["type"], "object");
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let output = registry
            .execute("echo", serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert_eq!(output, "hello world");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("nonexistent", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
