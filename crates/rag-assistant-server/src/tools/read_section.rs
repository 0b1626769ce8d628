use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::catalog::DocumentStore;
use crate::config::ProxyConfig;
use crate::models::mcp::ToolExecutionContext;
use crate::models::JsonMap;
use crate::utils::error::ApiError;
use crate::utils::token_estimator::estimate_tokens_capped;

use super::{require_str, trim_to_bytes, ProxyTool};

/// Whole section text, trimmed to the byte cap
pub struct ReadDocSectionTool {
    store: Arc<DocumentStore>,
}

impl ReadDocSectionTool {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProxyTool for ReadDocSectionTool {
    fn name(&self) -> &'static str {
        "read_doc_section"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "doc_id": {"type": "string"},
                "section_id": {"type": "string"}
            },
            "required": ["doc_id", "section_id"]
        })
    }

    async fn validate_and_run(
        &self,
        args: &JsonMap,
        ctx: &ToolExecutionContext,
        config: &ProxyConfig,
    ) -> Result<Value, ApiError> {
        let doc_id = require_str(args, "doc_id")?;
        let section_id = require_str(args, "section_id")?;

        self.store
            .require_tenant_access(&doc_id, &ctx.user.tenant_id)?;

        let content = self
            .store
            .read_section_text(&doc_id, &section_id)
            .ok_or_else(|| ApiError::NotFound("section_not_found".to_string()))?;

        let trimmed = trim_to_bytes(&content, config.max_text_bytes);
        let tokens = estimate_tokens_capped(&trimmed, config.rate_limit_tokens as usize);
        Ok(json!({
            "text": trimmed,
            "tokens": tokens,
            "section_id": section_id,
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
    async fn reads_section_text() {
        let registry = seeded_registry().await;
        let response = registry
            .execute(
                &execute_request(
                    "read_doc_section",
                    json!({"doc_id": "doc_1", "section_id": "sec_intro"}),
                    "tenant_1",
                ),
                &ProxyConfig::default(),
            )
            .await;
        assert!(response.is_ok());
        let result = response.result.unwrap();
        assert!(result["text"].as_str().unwrap().contains("LDAP"));
        assert!(result["tokens"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn missing_section_is_not_found() {
        let registry = seeded_registry().await;
        let response = registry
            .execute(
                &execute_request(
                    "read_doc_section",
                    json!({"doc_id": "doc_1", "section_id": "sec_none"}),
                    "tenant_1",
                ),
                &ProxyConfig::default(),
            )
            .await;
        assert_eq!(response.status, "error");
        assert_eq!(response.error.unwrap().code, "not_found");
    }

    #[tokio::test]
    async fn text_is_trimmed_to_byte_cap() {
        let registry = seeded_registry().await;
        let config = ProxyConfig {
            max_text_bytes: 16,
            ..ProxyConfig::default()
        };
        let response = registry
            .execute(
                &execute_request(
                    "read_doc_section",
                    json!({"doc_id": "doc_1", "section_id": "sec_intro"}),
                    "tenant_1",
                ),
                &config,
            )
            .await;
        let result = response.result.unwrap();
        assert!(result["text"].as_str().unwrap().len() <= 16);
    }

    #[tokio::test]
    async fn missing_arguments_rejected() {
        let registry = seeded_registry().await;
        let response = registry
            .execute(
                &execute_request("read_doc_section", json!({"doc_id": "doc_1"}), "tenant_1"),
                &ProxyConfig::default(),
            )
            .await;
        assert_eq!(response.status, "error");
        assert_eq!(response.error.unwrap().code, "bad_request");
    }
}
