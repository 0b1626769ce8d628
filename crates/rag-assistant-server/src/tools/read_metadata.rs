use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::catalog::DocumentStore;
use crate::config::ProxyConfig;
use crate::models::mcp::ToolExecutionContext;
use crate::models::JsonMap;
use crate::utils::error::ApiError;

use super::{require_str, ProxyTool};

/// Document metadata with its section table; no text
pub struct ReadDocMetadataTool {
    store: Arc<DocumentStore>,
}

impl ReadDocMetadataTool {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProxyTool for ReadDocMetadataTool {
    fn name(&self) -> &'static str {
        "read_doc_metadata"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "doc_id": {"type": "string"}
            },
            "required": ["doc_id"]
        })
    }

    async fn validate_and_run(
        &self,
        args: &JsonMap,
        ctx: &ToolExecutionContext,
        _config: &ProxyConfig,
    ) -> Result<Value, ApiError> {
        let doc_id = require_str(args, "doc_id")?;
        let metadata = self
            .store
            .require_tenant_access(&doc_id, &ctx.user.tenant_id)?;
        let sections = self.store.sections_for(&doc_id);

        let mut result = serde_json::to_value(&metadata)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if let Some(map) = result.as_object_mut() {
            let section_list: Vec<Value> = sections
                .iter()
                .map(|s| {
                    json!({
                        "section_id": s.section_id,
                        "title": s.title,
                        "page_start": s.page_start,
                        "page_end": s.page_end,
                    })
                })
                .collect();
            map.insert("sections".to_string(), Value::Array(section_list));
        }
        Ok(result)
    }
}
