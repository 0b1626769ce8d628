pub mod chunk_window;
pub mod list_tools;
pub mod local_search;
pub mod rate_limit;
pub mod read_metadata;
pub mod read_pages;
pub mod read_section;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::DocumentStore;
use crate::config::ProxyConfig;
use crate::models::mcp::{McpExecuteRequest, McpExecuteResponse, ToolExecutionContext};
use crate::models::JsonMap;
use crate::services::retriever::Retriever;
use crate::utils::error::ApiError;
use crate::utils::trace::or_new_trace_id;

use rate_limit::ToolRateLimiter;

/// One read-only tool behind the proxy: a JSON-schema argument contract
/// plus an executor. Validation is per-tool.
#[async_trait]
pub trait ProxyTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> Value;
    async fn validate_and_run(
        &self,
        args: &JsonMap,
        ctx: &ToolExecutionContext,
        config: &ProxyConfig,
    ) -> Result<Value, ApiError>;
}

/// Registry of named tools with tenant ACL and call/token rate limits.
/// Errors always leave as the `{status: "error"}` envelope; the HTTP layer
/// stays 200.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn ProxyTool>>,
    rate_limiter: ToolRateLimiter,
}

impl ToolRegistry {
    pub fn new(store: Arc<DocumentStore>, retriever: Arc<Retriever>) -> Self {
        let mut tools: BTreeMap<&'static str, Arc<dyn ProxyTool>> = BTreeMap::new();
        let base: Vec<Arc<dyn ProxyTool>> = vec![
            Arc::new(read_section::ReadDocSectionTool::new(store.clone())),
            Arc::new(read_pages::ReadDocPagesTool::new(store.clone())),
            Arc::new(read_metadata::ReadDocMetadataTool::new(store.clone())),
            Arc::new(local_search::DocLocalSearchTool::new(store.clone())),
            Arc::new(chunk_window::ReadChunkWindowTool::new(store, retriever)),
        ];
        for tool in base {
            tools.insert(tool.name(), tool);
        }
        let names = tools.keys().map(|n| n.to_string()).collect();
        let list_tool = Arc::new(list_tools::ListToolsTool::new(names));
        tools.insert(list_tool.name(), list_tool);

        Self {
            tools,
            rate_limiter: ToolRateLimiter::new(),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().map(|n| n.to_string()).collect()
    }

    pub fn schemas(&self) -> Vec<Value> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    pub async fn execute(
        &self,
        request: &McpExecuteRequest,
        config: &ProxyConfig,
    ) -> McpExecuteResponse {
        let trace_id = or_new_trace_id(request.trace_id.as_deref());
        let Some(tool) = self.tools.get(request.tool_name.as_str()) else {
            return McpExecuteResponse::error(
                "tool_not_found",
                format!("unknown tool '{}'", request.tool_name),
                trace_id,
            );
        };

        info!(
            tool = %request.tool_name,
            tenant_id = %request.user.tenant_id,
            user_id = %request.user.user_id,
            trace_id = %trace_id,
            "mcp_tool_invocation"
        );

        let doc_id = request.arguments.get("doc_id").and_then(Value::as_str);
        let limiter_key = ToolRateLimiter::bucket_key(&request.user.tenant_id, doc_id);
        if let Err(e) = self.rate_limiter.check_and_count(&limiter_key, config) {
            return error_envelope(e, &request.tool_name, trace_id);
        }

        let ctx = ToolExecutionContext {
            user: request.user.clone(),
            trace_id: trace_id.clone(),
        };
        match tool.validate_and_run(&request.arguments, &ctx, config).await {
            Ok(result) => {
                let tokens = result.get("tokens").and_then(Value::as_u64).unwrap_or(0);
                self.rate_limiter.record_result_tokens(&limiter_key, tokens);
                info!(
                    tool = %request.tool_name,
                    tokens,
                    trace_id = %trace_id,
                    "mcp_tool_completed"
                );
                McpExecuteResponse::ok(result, trace_id)
            }
            Err(e) => error_envelope(e, &request.tool_name, trace_id),
        }
    }

}

fn error_envelope(error: ApiError, tool: &str, trace_id: String) -> McpExecuteResponse {
    warn!(tool, code = error.code(), message = %error.detail(), "mcp_tool_error");
    McpExecuteResponse::error(error.code().to_string(), error.detail(), trace_id)
}

// ===== Shared argument helpers =====

pub(crate) fn require_str(args: &JsonMap, key: &str) -> Result<String, ApiError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError::BadRequest(format!("{key} is required")))
}

pub(crate) fn require_u32(args: &JsonMap, key: &str) -> Result<u32, ApiError> {
    let value = args
        .get(key)
        .ok_or_else(|| ApiError::BadRequest(format!("{key} is required")))?;
    as_u32(value, key)
}

pub(crate) fn opt_u32(args: &JsonMap, key: &str) -> Result<Option<u32>, ApiError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => as_u32(value, key).map(Some),
    }
}

fn as_u32(value: &Value, key: &str) -> Result<u32, ApiError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| ApiError::BadRequest(format!("{key} must be a non-negative integer"))),
        Value::String(s) => s
            .parse::<u32>()
            .map_err(|_| ApiError::BadRequest(format!("{key} must be a non-negative integer"))),
        _ => Err(ApiError::BadRequest(format!(
            "{key} must be a non-negative integer"
        ))),
    }
}

pub(crate) fn trim_to_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
