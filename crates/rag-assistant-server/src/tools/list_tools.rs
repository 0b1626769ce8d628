use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ProxyConfig;
use crate::models::mcp::ToolExecutionContext;
use crate::models::JsonMap;
use crate::utils::error::ApiError;

use super::ProxyTool;

/// Introspection: the registered tool names
pub struct ListToolsTool {
    tool_names: Vec<String>,
}

impl ListToolsTool {
    pub fn new(tool_names: Vec<String>) -> Self {
        Self { tool_names }
    }
}

#[async_trait]
impl ProxyTool for ListToolsTool {
    fn name(&self) -> &'static str {
        "list_available_tools"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn validate_and_run(
        &self,
        _args: &JsonMap,
        _ctx: &ToolExecutionContext,
        _config: &ProxyConfig,
    ) -> Result<Value, ApiError> {
        Ok(json!({ "tools": self.tool_names }))
    }
}
