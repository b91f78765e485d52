//! An executor that tries in-process tools first, then falls through.

use async_trait::async_trait;
use chorus_core::error::ToolError;
use chorus_core::provider::ToolDefinition;
use chorus_core::tool::{ToolExecutor, ToolRegistry};
use std::sync::Arc;

/// Local tools shadow same-named tools of the inner executor.
pub struct LayeredExecutor {
    local: ToolRegistry,
    inner: Arc<dyn ToolExecutor>,
}

impl LayeredExecutor {
    pub fn new(local: ToolRegistry, inner: Arc<dyn ToolExecutor>) -> Self {
        Self { local, inner }
    }
}

#[async_trait]
impl ToolExecutor for LayeredExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.local.definitions();
        defs.extend(
            self.inner
                .definitions()
                .into_iter()
                .filter(|d| self.local.get(&d.name).is_none()),
        );
        defs
    }

    async fn execute(&self, name: &str, input: serde_json::Value) -> Result<String, ToolError> {
        if self.local.get(name).is_some() {
            self.local.execute(name, input).await
        } else {
            self.inner.execute(name, input).await
        }
    }
}
