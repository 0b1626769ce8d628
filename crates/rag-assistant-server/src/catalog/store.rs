use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::models::catalog::{ChunkRecord, DocumentMetadata, SectionInfo};
use crate::utils::error::ApiError;

/// Read-only view over the document catalog. Documents, sections and chunks
/// are owned by the ingestion subsystem; this gateway only serves lookups
/// for the tool proxy and the retrieval window endpoint.
#[derive(Default)]
pub struct DocumentStore {
    docs: RwLock<HashMap<String, DocumentMetadata>>,
    sections: RwLock<HashMap<String, Vec<SectionInfo>>>,
    chunks: RwLock<HashMap<String, Vec<ChunkRecord>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_document(
        &self,
        metadata: DocumentMetadata,
        sections: Vec<SectionInfo>,
        mut chunks: Vec<ChunkRecord>,
    ) {
        chunks.sort_by(|a, b| (a.page, a.chunk_index).cmp(&(b.page, b.chunk_index)));
        let doc_id = metadata.doc_id.clone();
        self.docs.write().insert(doc_id.clone(), metadata);
        self.sections.write().insert(doc_id.clone(), sections);
        self.chunks.write().insert(doc_id, chunks);
    }

    pub fn get_metadata(&self, doc_id: &str) -> Option<DocumentMetadata> {
        self.docs.read().get(doc_id).cloned()
    }

    /// Tenant gate shared by every tool. Missing doc is 404; a tenant
    /// mismatch never reveals whether the doc exists elsewhere.
    pub fn require_tenant_access(
        &self,
        doc_id: &str,
        tenant_id: &str,
    ) -> Result<DocumentMetadata, ApiError> {
        let metadata = self
            .get_metadata(doc_id)
            .ok_or_else(|| ApiError::NotFound("document_not_found".to_string()))?;
        if metadata.tenant_id != tenant_id {
            warn!(doc_id, tenant_id, "tenant_access_denied");
            return Err(ApiError::AccessDenied(format!(
                "tenant {tenant_id} cannot access document {doc_id}"
            )));
        }
        debug!(doc_id, tenant_id, "tenant_access_ok");
        Ok(metadata)
    }

    pub fn sections_for(&self, doc_id: &str) -> Vec<SectionInfo> {
        self.sections.read().get(doc_id).cloned().unwrap_or_default()
    }

    pub fn get_section(&self, doc_id: &str, section_id: &str) -> Option<SectionInfo> {
        self.sections
            .read()
            .get(doc_id)
            .and_then(|sections| sections.iter().find(|s| s.section_id == section_id).cloned())
    }

    /// Whole section text: the section's chunks concatenated in order
    pub fn read_section_text(&self, doc_id: &str, section_id: &str) -> Option<String> {
        let chunks = self.chunks.read();
        let doc_chunks = chunks.get(doc_id)?;
        let texts: Vec<&str> = doc_chunks
            .iter()
            .filter(|c| c.section_id == section_id)
            .map(|c| c.text.as_str())
            .collect();
        if texts.is_empty() {
            return None;
        }
        Some(texts.join("\n"))
    }

    pub fn read_pages(&self, doc_id: &str, page_start: u32, page_end: u32) -> Option<String> {
        let chunks = self.chunks.read();
        let doc_chunks = chunks.get(doc_id)?;
        let texts: Vec<&str> = doc_chunks
            .iter()
            .filter(|c| c.page >= page_start && c.page <= page_end)
            .map(|c| c.text.as_str())
            .collect();
        if texts.is_empty() {
            return None;
        }
        Some(texts.join("\n"))
    }

    /// Substring search within one doc; +-80 char snippet windows
    pub fn local_search(&self, doc_id: &str, query: &str, max_results: usize) -> Vec<String> {
        let mut snippets = Vec::new();
        if query.is_empty() {
            return snippets;
        }
        let chunks = self.chunks.read();
        let Some(doc_chunks) = chunks.get(doc_id) else {
            return snippets;
        };
        let content: String = doc_chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let lowered = content.to_lowercase();
        let q = query.to_lowercase();

        let mut start = 0;
        while snippets.len() < max_results {
            let Some(rel) = lowered[start..].find(&q) else {
                break;
            };
            let idx = start + rel;
            let window_start = floor_char_boundary(&content, idx.saturating_sub(80));
            let window_end = ceil_char_boundary(&content, (idx + q.len() + 80).min(content.len()));
            snippets.push(content[window_start..window_end].trim().to_string());
            start = idx + q.len();
        }
        snippets
    }

    /// Contiguous ordered window `[anchor-before ..= anchor+after]` over the
    /// doc's chunk total order
    pub fn chunk_window(
        &self,
        doc_id: &str,
        anchor_chunk_id: &str,
        before: u32,
        after: u32,
    ) -> Result<Vec<ChunkRecord>, ApiError> {
        let chunks = self.chunks.read();
        let doc_chunks = chunks
            .get(doc_id)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ApiError::NotFound("chunks_not_found".to_string()))?;
        let anchor_pos = doc_chunks
            .iter()
            .position(|c| c.chunk_id == anchor_chunk_id)
            .ok_or_else(|| ApiError::NotFound("anchor_chunk_not_found".to_string()))?;

        let start = anchor_pos.saturating_sub(before as usize);
        let end = (anchor_pos + after as usize + 1).min(doc_chunks.len());
        Ok(doc_chunks[start..end].to_vec())
    }

    pub fn doc_count(&self) -> usize {
        self.docs.read().len()
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
