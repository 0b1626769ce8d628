use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Indexed,
    Failed,
}

/// Catalog-level document record. Owned by the ingestion subsystem;
/// read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub doc_id: String,
    pub tenant_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionInfo {
    pub doc_id: String,
    pub section_id: String,
    pub title: String,
    pub page_start: u32,
    pub page_end: u32,
    /// Short abstract, never the full text
    pub summary: String,
    /// Ordered chunk ids for this section
    pub chunk_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_chunk_id: Option<String>,
}

impl SectionInfo {
    /// First chunk unless an anchor was set explicitly
    pub fn anchor_chunk_id(&self) -> Option<&str> {
        self.anchor_chunk_id
            .as_deref()
            .or_else(|| self.chunk_ids.first().map(|s| s.as_str()))
    }
}

/// Chunks within a doc form a total order by (page, chunk_index)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub section_id: String,
    pub page: u32,
    pub chunk_index: u32,
    pub text: String,
}
