use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::chat::UserContext;

pub type JsonMap = Map<String, Value>;

#[derive(Debug, Clone, Deserialize)]
pub struct McpExecuteRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: JsonMap,
    pub user: UserContext,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: String,
    pub message: String,
}

/// Envelope returned for every tool invocation. HTTP status is always 200
/// at the proxy boundary; callers branch on `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpExecuteResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
    pub trace_id: String,
}

impl McpExecuteResponse {
    pub fn ok(result: Value, trace_id: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            result: Some(result),
            error: None,
            trace_id: trace_id.into(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            result: None,
            error: Some(McpError {
                code: code.into(),
                message: message.into(),
            }),
            trace_id: trace_id.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub user: UserContext,
    pub trace_id: String,
}
