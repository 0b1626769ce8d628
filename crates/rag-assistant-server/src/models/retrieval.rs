use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_ids: Option<Vec<String>>,
}

/// Per-request knobs; missing fields fall back to configuration defaults
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetrievalQuery {
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub filters: Option<RetrievalFilters>,
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
    #[serde(default)]
    pub section_ids: Option<Vec<String>>,
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
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// One retrieval result. Raw chunk text is never serialized back to the
/// caller; only summary/title/page metadata travel upward.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetrievalHit {
    pub doc_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_chunk_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    /// Cosine score of the owning doc, kept for deterministic tie-breaks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_score: Option<f32>,
}

impl RetrievalHit {
    pub fn anchor(&self) -> Option<&str> {
        self.anchor_chunk_id
            .as_deref()
            .or_else(|| self.chunk_ids.as_ref().and_then(|c| c.first().map(|s| s.as_str())))
            .or(self.chunk_id.as_deref())
    }
}

/// Snapshot of each stage for observability
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepTrace {
    pub docs: Vec<RetrievalHit>,
    pub sections: Vec<RetrievalHit>,
    pub chunks: Vec<RetrievalHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetrievalResponse {
    pub hits: Vec<RetrievalHit>,
    pub steps: StepTrace,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkWindowRequest {
    pub tenant_id: String,
    pub doc_id: String,
    pub anchor_chunk_id: String,
    #[serde(default = "default_window_side")]
    pub window_before: u32,
    #[serde(default = "default_window_side")]
    pub window_after: u32,
}

fn default_window_side() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowChunk {
    pub chunk_id: String,
    pub page: u32,
    pub chunk_index: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkWindowResponse {
    pub chunks: Vec<WindowChunk>,
}
