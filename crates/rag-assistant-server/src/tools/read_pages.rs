use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::catalog::DocumentStore;
use crate::config::ProxyConfig;
use crate::models::mcp::ToolExecutionContext;
use crate::models::JsonMap;
use crate::utils::error::ApiError;
use crate::utils::token_estimator::estimate_tokens_capped;

use super::{require_str, require_u32, trim_to_bytes, ProxyTool};

pub struct ReadDocPagesTool {
    store: Arc<DocumentStore>,
}

impl ReadDocPagesTool {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProxyTool for ReadDocPagesTool {
    fn name(&self) -> &'static str {
        "read_doc_pages"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "doc_id": {"type": "string"},
                "page_start": {"type": "integer", "minimum": 1},
                "page_end": {"type": "integer", "minimum": 1}
            },
            "required": ["doc_id", "page_start", "page_end"]
        })
    }

    async fn validate_and_run(
        &self,
        args: &JsonMap,
        ctx: &ToolExecutionContext,
        config: &ProxyConfig,
    ) -> Result<Value, ApiError> {
        let doc_id = require_str(args, "doc_id")?;
        let page_start = require_u32(args, "page_start")?;
        let page_end = require_u32(args, "page_end")?;

        if page_end < page_start {
            return Err(ApiError::BadRequest(
                "page_end must be >= page_start".to_string(),
            ));
        }
        if page_end - page_start + 1 > config.max_pages_per_call {
            return Err(ApiError::BadRequest(format!(
                "page span exceeds limit of {}",
                config.max_pages_per_call
            )));
        }

        self.store
            .require_tenant_access(&doc_id, &ctx.user.tenant_id)?;

        let content = self
            .store
            .read_pages(&doc_id, page_start, page_end)
            .ok_or_else(|| ApiError::NotFound("pages_not_found".to_string()))?;

        let trimmed = trim_to_bytes(&content, config.max_text_bytes);
        let tokens = estimate_tokens_capped(&trimmed, config.rate_limit_tokens as usize);
        Ok(json!({
            "text": trimmed,
            "tokens": tokens,
            "page_start": page_start,
            "page_end": page_end,
            "doc_id": doc_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{execute_request, seeded_registry};
    use crate::config::ProxyConfig;
    use serde_json::json;

    #[tokio::test]
    async fn reads_page_range() {
        let registry = seeded_registry().await;
        let response = registry
            .execute(
                &execute_request(
                    "read_doc_pages",
                    json!({"doc_id": "doc_1", "page_start": 1, "page_end": 2}),
                    "tenant_1",
                ),
                &ProxyConfig::default(),
            )
            .await;
        assert!(response.is_ok());
        assert!(response.result.unwrap()["text"]
            .as_str()
            .unwrap()
            .contains("LDAP"));
    }

    #[tokio::test]
    async fn span_over_limit_rejected() {
        let registry = seeded_registry().await;
        let response = registry
            .execute(
                &execute_request(
                    "read_doc_pages",
                    json!({"doc_id": "doc_1", "page_start": 1, "page_end": 7}),
                    "tenant_1",
                ),
                &ProxyConfig::default(),
            )
            .await;
        assert_eq!(response.status, "error");
        assert_eq!(response.error.unwrap().code, "bad_request");
    }

    #[tokio::test]
    async fn pages_outside_document_are_not_found() {
        let registry = seeded_registry().await;
        let response = registry
            .execute(
                &execute_request(
                    "read_doc_pages",
                    json!({"doc_id": "doc_1", "page_start": 90, "page_end": 92}),
                    "tenant_1",
                ),
                &ProxyConfig::default(),
            )
            .await;
        assert_eq!(response.status, "error");
        assert_eq!(response.error.unwrap().code, "not_found");
    }
}
