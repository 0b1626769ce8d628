use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::catalog::DocumentStore;
use crate::config::ProxyConfig;
use crate::models::mcp::ToolExecutionContext;
use crate::models::retrieval::ChunkWindowRequest;
use crate::models::JsonMap;
use crate::services::retriever::Retriever;
use crate::utils::error::ApiError;
use crate::utils::token_estimator::BYTES_PER_TOKEN;

use super::{opt_u32, require_str, trim_to_bytes, ProxyTool};

/// Contiguous ordered window of chunks around an anchor. The byte budget
/// is shared across the returned chunks.
pub struct ReadChunkWindowTool {
    store: Arc<DocumentStore>,
    retriever: Arc<Retriever>,
}

impl ReadChunkWindowTool {
    pub fn new(store: Arc<DocumentStore>, retriever: Arc<Retriever>) -> Self {
        Self { store, retriever }
    }
}

#[async_trait]
impl ProxyTool for ReadChunkWindowTool {
    fn name(&self) -> &'static str {
        "read_chunk_window"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "doc_id": {"type": "string"},
                "anchor_chunk_id": {"type": "string"},
                "window_before": {"type": "integer", "minimum": 0},
                "window_after": {"type": "integer", "minimum": 0},
                "radius": {"type": "integer", "minimum": 0}
            },
            "required": ["doc_id", "anchor_chunk_id"]
        })
    }

    async fn validate_and_run(
        &self,
        args: &JsonMap,
        ctx: &ToolExecutionContext,
        config: &ProxyConfig,
    ) -> Result<Value, ApiError> {
        let doc_id = require_str(args, "doc_id")?;
        let anchor_chunk_id = require_str(args, "anchor_chunk_id")?;

        // `radius` is an alias setting both sides
        let radius = opt_u32(args, "radius")?;
        let before = opt_u32(args, "window_before")?.or(radius).unwrap_or(0);
        let after = opt_u32(args, "window_after")?.or(radius).unwrap_or(0);

        let requested = before.max(after);
        if requested > config.max_window_radius {
            return Err(ApiError::policy(
                "WINDOW_TOO_LARGE",
                format!(
                    "requested radius {requested} exceeds limit {}",
                    config.max_window_radius
                ),
            ));
        }

        self.store
            .require_tenant_access(&doc_id, &ctx.user.tenant_id)?;

        let window = self
            .retriever
            .chunk_window(&ChunkWindowRequest {
                tenant_id: ctx.user.tenant_id.clone(),
                doc_id: doc_id.clone(),
                anchor_chunk_id: anchor_chunk_id.clone(),
                window_before: before,
                window_after: after,
            })
            .await?;

        // Shared byte budget across the window, in order
        let mut remaining = config.max_text_bytes;
        let mut chunks = Vec::with_capacity(window.chunks.len());
        let mut total_text = 0usize;
        for chunk in &window.chunks {
            if remaining == 0 {
                break;
            }
            let text = trim_to_bytes(&chunk.text, remaining);
            remaining -= text.len();
            total_text += text.len();
            chunks.push(json!({
                "chunk_id": chunk.chunk_id,
                "page": chunk.page,
                "chunk_index": chunk.chunk_index,
                "text": text,
            }));
        }

        let tokens = (total_text / BYTES_PER_TOKEN).min(config.rate_limit_tokens as usize);
        Ok(json!({
            "doc_id": doc_id,
            "anchor_chunk_id": anchor_chunk_id,
            "window_before": before,
            "window_after": after,
            "chunks": chunks,
            "count": chunks.len(),
            "tokens": tokens,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{execute_request, seeded_registry};
    use crate::config::ProxyConfig;
    use serde_json::json;

    #[tokio::test]
    async fn returns_ordered_window() {
        let registry = seeded_registry().await;
        let response = registry
            .execute(
                &execute_request(
                    "read_chunk_window",
                    json!({"doc_id": "doc_1", "anchor_chunk_id": "chunk_3", "window_before": 1, "window_after": 1}),
                    "tenant_1",
                ),
                &ProxyConfig::default(),
            )
            .await;
        assert!(response.is_ok());
        let result = response.result.unwrap();
        let ids: Vec<&str> = result["chunks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["chunk_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["chunk_2", "chunk_3", "chunk_4"]);
        assert_eq!(result["count"], 3);
    }

    #[tokio::test]
    async fn radius_alias_sets_both_sides() {
        let registry = seeded_registry().await;
        let response = registry
            .execute(
                &execute_request(
                    "read_chunk_window",
                    json!({"doc_id": "doc_1", "anchor_chunk_id": "chunk_3", "radius": 1}),
                    "tenant_1",
                ),
                &ProxyConfig::default(),
            )
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["window_before"], 1);
        assert_eq!(result["window_after"], 1);
    }

    #[tokio::test]
    async fn window_over_radius_cap_is_rejected_with_requested_radius() {
        let registry = seeded_registry().await;
        let config = ProxyConfig {
            max_window_radius: 1,
            ..ProxyConfig::default()
        };
        let response = registry
            .execute(
                &execute_request(
                    "read_chunk_window",
                    json!({"doc_id": "doc_1", "anchor_chunk_id": "chunk_3", "window_before": 5, "window_after": 3}),
                    "tenant_1",
                ),
                &config,
            )
            .await;
        assert_eq!(response.status, "error");
        let error = response.error.unwrap();
        assert_eq!(error.code, "WINDOW_TOO_LARGE");
        assert!(error.message.contains('5'));
    }

    #[tokio::test]
    async fn missing_anchor_is_not_found() {
        let registry = seeded_registry().await;
        let response = registry
            .execute(
                &execute_request(
                    "read_chunk_window",
                    json!({"doc_id": "doc_1", "anchor_chunk_id": "chunk_77", "radius": 1}),
                    "tenant_1",
                ),
                &ProxyConfig::default(),
            )
            .await;
        assert_eq!(response.status, "error");
        assert_eq!(response.error.unwrap().code, "not_found");
    }

    #[tokio::test]
    async fn byte_budget_is_shared_across_chunks() {
        let registry = seeded_registry().await;
        let config = ProxyConfig {
            max_text_bytes: 40,
            ..ProxyConfig::default()
        };
        let response = registry
            .execute(
                &execute_request(
                    "read_chunk_window",
                    json!({"doc_id": "doc_1", "anchor_chunk_id": "chunk_3", "window_before": 2, "window_after": 2}),
                    "tenant_1",
                ),
                &config,
            )
            .await;
        let result = response.result.unwrap();
        let total: usize = result["chunks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["text"].as_str().unwrap().len())
            .sum();
        assert!(total <= 40);
    }
}
