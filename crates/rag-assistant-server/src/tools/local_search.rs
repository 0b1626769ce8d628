use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::catalog::DocumentStore;
use crate::config::ProxyConfig;
use crate::models::mcp::ToolExecutionContext;
use crate::models::JsonMap;
use crate::utils::error::ApiError;
use crate::utils::token_estimator::BYTES_PER_TOKEN;

use super::{opt_u32, require_str, trim_to_bytes, ProxyTool};

const MAX_RESULTS_CAP: u32 = 5;

/// Substring search within one document, snippet windows around matches
pub struct DocLocalSearchTool {
    store: Arc<DocumentStore>,
}

impl DocLocalSearchTool {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProxyTool for DocLocalSearchTool {
    fn name(&self) -> &'static str {
        "doc_local_search"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "doc_id": {"type": "string"},
                "query": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1, "maximum": MAX_RESULTS_CAP}
            },
            "required": ["doc_id", "query"]
        })
    }

    async fn validate_and_run(
        &self,
        args: &JsonMap,
        ctx: &ToolExecutionContext,
        config: &ProxyConfig,
    ) -> Result<Value, ApiError> {
        let doc_id = require_str(args, "doc_id")?;
        let query = require_str(args, "query")?;
        let max_results = opt_u32(args, "max_results")?
            .unwrap_or(3)
            .clamp(1, MAX_RESULTS_CAP) as usize;

        self.store
            .require_tenant_access(&doc_id, &ctx.user.tenant_id)?;

        let snippets = self.store.local_search(&doc_id, &query, max_results);
        if snippets.is_empty() {
            return Err(ApiError::NotFound("no_snippets_found".to_string()));
        }

        let per_snippet_budget = config.max_text_bytes / max_results;
        let trimmed: Vec<Value> = snippets
            .iter()
            .map(|s| json!({ "snippet": trim_to_bytes(s, per_snippet_budget) }))
            .collect();
        let total_text: usize = trimmed
            .iter()
            .filter_map(|s| s["snippet"].as_str())
            .map(|s| s.len())
            .sum();
        let tokens = (total_text / BYTES_PER_TOKEN).min(config.rate_limit_tokens as usize);

        Ok(json!({
            "snippets": trimmed,
            "count": trimmed.len(),
            "doc_id": doc_id,
            "tokens": tokens,
        }))
    }
}
