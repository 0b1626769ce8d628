use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chat::UserContext;
use super::retrieval::{RetrievalFilters, RetrievalHit};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrchestratorRequest {
    pub query: String,
    #[serde(default)]
    pub user: Option<UserContext>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    /// Input safety verdict forwarded by the gateway
    #[serde(default)]
    pub safety: Option<String>,
    // Retrieval knobs mirrored from the retriever contract
    #[serde(default)]
    pub filters: Option<RetrievalFilters>,
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
    #[serde(default)]
    pub section_ids: Option<Vec<String>>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub docs_top_k: Option<usize>,
    #[serde(default)]
    pub sections_top_k_per_doc: Option<usize>,
    #[serde(default)]
    pub max_total_sections: Option<usize>,
    #[serde(default)]
    pub enable_section_cosine: Option<bool>,
    #[serde(default)]
    pub enable_rerank: Option<bool>,
    #[serde(default)]
    pub rerank_score_threshold: Option<f32>,
    #[serde(default)]
    pub chunks_enabled: Option<bool>,
    #[serde(default)]
    pub enable_filters: Option<bool>,
}

/// One executed tool call, captured for the response trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallTrace {
    pub name: String,
    pub arguments: Value,
    pub result_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SafetyBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Telemetry {
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_latency_ms: Option<u64>,
    pub tool_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt: u64,
    pub completion: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResponse {
    pub answer: String,
    pub sources: Vec<RetrievalHit>,
    pub tools: Vec<ToolCallTrace>,
    pub safety: SafetyBlock,
    pub telemetry: Telemetry,
    pub used_tokens: UsageStats,
}

// ===== Public assistant surface (gateway) =====

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantQueryRequest {
    pub query: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub context: Option<AssistantQueryContext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantQueryContext {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponseMeta {
    pub trace_id: String,
    pub safety: SafetyBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponse {
    pub answer: String,
    pub sources: Vec<RetrievalHit>,
    pub meta: AssistantResponseMeta,
}
