use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::models::retrieval::{
    ChunkWindowRequest, ChunkWindowResponse, RetrievalHit, RetrievalQuery, RetrievalResponse,
    StepTrace, WindowChunk,
};
use crate::models::JsonMap;
use crate::services::reranker::{rerank_key, Reranker};
use crate::services::vector_index::{Collection, Predicate, VectorIndexGateway};
use crate::utils::error::ApiError;

/// Metadata-scan ceiling for the chunk-stage substring fallback
const FALLBACK_SCAN_LIMIT: usize = 500;

/// Three-stage hierarchical search: docs -> sections -> chunks, with an
/// optional LLM rerank between sections and chunks. Every stage snapshot
/// lands in the step trace before the next stage runs.
pub struct Retriever {
    gateway: Arc<VectorIndexGateway>,
    reranker: Option<Arc<dyn Reranker>>,
}

struct Knobs {
    max_results: usize,
    docs_top_k: usize,
    sections_top_k_per_doc: usize,
    max_total_sections: usize,
    chunk_top_k: usize,
    topk_per_doc: usize,
    min_docs: usize,
    enable_section_cosine: bool,
    enable_rerank: bool,
    rerank_score_threshold: f32,
    rerank_top_n: usize,
    chunks_enabled: bool,
    enable_filters: bool,
}

impl Knobs {
    fn resolve(query: &RetrievalQuery, config: &RetrievalConfig) -> Self {
        Self {
            max_results: query.max_results.unwrap_or(config.max_results).max(1),
            docs_top_k: query.docs_top_k.unwrap_or(config.docs_top_k).max(1),
            sections_top_k_per_doc: query
                .sections_top_k_per_doc
                .unwrap_or(config.sections_top_k_per_doc)
                .max(1),
            max_total_sections: query
                .max_total_sections
                .unwrap_or(config.max_total_sections)
                .max(1),
            chunk_top_k: config.chunk_top_k.max(1),
            topk_per_doc: config.topk_per_doc,
            min_docs: config.min_docs,
            enable_section_cosine: query
                .enable_section_cosine
                .unwrap_or(config.enable_section_cosine),
            enable_rerank: query.enable_rerank.unwrap_or(config.enable_rerank),
            rerank_score_threshold: query
                .rerank_score_threshold
                .unwrap_or(config.rerank_score_threshold),
            rerank_top_n: config.rerank_top_n,
            chunks_enabled: query.chunks_enabled.unwrap_or(config.chunks_enabled),
            enable_filters: query.enable_filters.unwrap_or(config.enable_filters),
        }
    }
}

impl Retriever {
    pub fn new(gateway: Arc<VectorIndexGateway>, reranker: Option<Arc<dyn Reranker>>) -> Self {
        Self { gateway, reranker }
    }

    pub async fn search(
        &self,
        query: &RetrievalQuery,
        config: &RetrievalConfig,
    ) -> Result<RetrievalResponse, ApiError> {
        let knobs = Knobs::resolve(query, config);
        let mut steps = StepTrace::default();

        let embedding = self.gateway.embedding.embed_one(&query.query).await;

        // ---- Doc stage ----
        let doc_filter = self.doc_filter(query, &knobs);
        let mut docs = self
            .gateway
            .query(
                Collection::Docs,
                &query.tenant_id,
                &embedding,
                doc_filter.clone(),
                knobs.docs_top_k,
            )
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?
            .into_iter()
            .map(|scored| doc_hit(&scored.record.metadata, scored.score))
            .collect::<Vec<_>>();

        if docs.len() < knobs.min_docs {
            let pad = self
                .gateway
                .get(
                    Collection::Docs,
                    &query.tenant_id,
                    doc_filter,
                    knobs.min_docs + knobs.docs_top_k,
                )
                .await
                .map_err(|e| ApiError::Upstream(e.to_string()))?;
            for record in pad {
                if docs.len() >= knobs.min_docs {
                    break;
                }
                let candidate = doc_hit(&record.metadata, 0.0);
                if docs.iter().any(|d| d.doc_id == candidate.doc_id) {
                    continue;
                }
                docs.push(candidate);
            }
        }
        steps.docs = docs.clone();

        // ---- Section stage ----
        let mut sections = Vec::new();
        for doc in &docs {
            let mut filter = Predicate::eq("doc_id", &doc.doc_id);
            if let Some(section_ids) = self.section_narrowing(query) {
                filter = filter.and(Predicate::In("section_id".into(), section_ids));
            }
            if knobs.enable_section_cosine {
                let scored = self
                    .gateway
                    .query(
                        Collection::Sections,
                        &query.tenant_id,
                        &embedding,
                        filter,
                        knobs.sections_top_k_per_doc,
                    )
                    .await
                    .map_err(|e| ApiError::Upstream(e.to_string()))?;
                sections.extend(
                    scored
                        .into_iter()
                        .map(|s| section_hit(&s.record.metadata, s.score, doc.score)),
                );
            } else {
                let records = self
                    .gateway
                    .get(
                        Collection::Sections,
                        &query.tenant_id,
                        filter,
                        knobs.sections_top_k_per_doc,
                    )
                    .await
                    .map_err(|e| ApiError::Upstream(e.to_string()))?;
                sections.extend(
                    records
                        .into_iter()
                        .map(|r| section_hit(&r.metadata, 0.0, doc.score)),
                );
            }
        }
        // Stable sort by (doc cosine, section cosine), both descending
        sections.sort_by(|a, b| {
            cmp_f32_desc(a.doc_score.unwrap_or(0.0), b.doc_score.unwrap_or(0.0))
                .then(cmp_f32_desc(a.score, b.score))
        });
        sections.truncate(knobs.max_total_sections);
        steps.sections = sections.clone();

        // ---- Rerank stage ----
        if knobs.enable_rerank {
            match &self.reranker {
                Some(reranker) if reranker.available() => {
                    match reranker.rerank(&query.query, &sections).await {
                        Ok(scores) => {
                            sections = apply_rerank(
                                sections,
                                &scores,
                                knobs.rerank_score_threshold,
                                knobs.rerank_top_n,
                                knobs.max_total_sections,
                            );
                        }
                        Err(e) => warn!(error = %e, "rerank_failed_keeping_order"),
                    }
                }
                _ => debug!("rerank requested but no reranker available"),
            }
        }

        // ---- Chunk stage ----
        let mut hits = sections.clone();
        if knobs.chunks_enabled && !sections.is_empty() {
            let chunks = self
                .chunk_stage(query, &knobs, &embedding, &sections)
                .await?;
            steps.chunks = chunks.clone();
            hits = chunks;
        }

        hits.sort_by(cmp_hits);
        hits.truncate(knobs.max_results);

        info!(
            tenant_id = %query.tenant_id,
            hits = hits.len(),
            docs = steps.docs.len(),
            sections = steps.sections.len(),
            chunks = steps.chunks.len(),
            "retrieval_response"
        );
        Ok(RetrievalResponse { hits, steps })
    }

    fn doc_filter(&self, query: &RetrievalQuery, knobs: &Knobs) -> Predicate {
        let mut filter = Predicate::True;
        if knobs.enable_filters {
            if let Some(filters) = &query.filters {
                if let Some(product) = &filters.product {
                    filter = filter.and(Predicate::eq("product", product));
                }
                if let Some(version) = &filters.version {
                    filter = filter.and(Predicate::eq("version", version));
                }
                if let Some(tags) = &filters.tags {
                    if !tags.is_empty() {
                        filter = filter.and(Predicate::TagsAnyOf(tags.clone()));
                    }
                }
            }
        }
        // doc_ids narrowing survives enable_filters = false
        let narrowing = query
            .doc_ids
            .clone()
            .or_else(|| query.filters.as_ref().and_then(|f| f.doc_ids.clone()));
        if let Some(doc_ids) = narrowing {
            if !doc_ids.is_empty() {
                filter = filter.and(Predicate::In("doc_id".into(), doc_ids));
            }
        }
        filter
    }

    fn section_narrowing(&self, query: &RetrievalQuery) -> Option<Vec<String>> {
        query
            .section_ids
            .clone()
            .or_else(|| query.filters.as_ref().and_then(|f| f.section_ids.clone()))
            .filter(|ids| !ids.is_empty())
    }

    async fn chunk_stage(
        &self,
        query: &RetrievalQuery,
        knobs: &Knobs,
        embedding: &[f32],
        sections: &[RetrievalHit],
    ) -> Result<Vec<RetrievalHit>, ApiError> {
        let doc_ids: Vec<String> = dedup(sections.iter().map(|s| s.doc_id.clone()));
        let section_ids: Vec<String> =
            dedup(sections.iter().filter_map(|s| s.section_id.clone()));
        let by_section: HashMap<String, &RetrievalHit> = sections
            .iter()
            .filter_map(|s| s.section_id.clone().map(|id| (rerank_key(&s.doc_id, &id), s)))
            .collect();

        let filter = Predicate::In("doc_id".into(), doc_ids)
            .and(Predicate::In("section_id".into(), section_ids));

        let scored = self
            .gateway
            .query(
                Collection::Chunks,
                &query.tenant_id,
                embedding,
                filter.clone(),
                knobs.chunk_top_k,
            )
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        let mut chunks: Vec<RetrievalHit> = scored
            .into_iter()
            .filter_map(|s| chunk_hit(&s.record.metadata, s.score, &by_section))
            .collect();

        if chunks.is_empty() {
            // ANN came back dry; substring scan over the same filter
            let records = self
                .gateway
                .get(Collection::Chunks, &query.tenant_id, filter, FALLBACK_SCAN_LIMIT)
                .await
                .map_err(|e| ApiError::Upstream(e.to_string()))?;
            let needle = query.query.to_lowercase();
            chunks = records
                .into_iter()
                .filter(|r| {
                    get_str(&r.metadata, "text")
                        .map(|t| t.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .filter_map(|r| chunk_hit(&r.metadata, 0.0, &by_section))
                .collect();
            debug!(matched = chunks.len(), "chunk_substring_fallback");
        }

        if knobs.topk_per_doc > 0 {
            let mut per_doc: HashMap<String, usize> = HashMap::new();
            chunks.sort_by(cmp_hits);
            chunks.retain(|c| {
                let seen = per_doc.entry(c.doc_id.clone()).or_insert(0);
                *seen += 1;
                *seen <= knobs.topk_per_doc
            });
        }

        chunks.sort_by(cmp_hits);
        chunks.truncate(knobs.max_results);
        Ok(chunks)
    }

    /// Ordered contiguous window around an anchor chunk, served from the
    /// chunks collection under the tenant conjunct
    pub async fn chunk_window(
        &self,
        request: &ChunkWindowRequest,
    ) -> Result<ChunkWindowResponse, ApiError> {
        let records = self
            .gateway
            .get(
                Collection::Chunks,
                &request.tenant_id,
                Predicate::eq("doc_id", &request.doc_id),
                1000,
            )
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        if records.is_empty() {
            return Err(ApiError::NotFound("chunks_not_found".to_string()));
        }

        let mut chunks: Vec<WindowChunk> = records
            .iter()
            .map(|r| WindowChunk {
                chunk_id: get_str(&r.metadata, "chunk_id").unwrap_or_else(|| r.id.clone()),
                page: get_u32(&r.metadata, "page").unwrap_or(0),
                chunk_index: get_u32(&r.metadata, "chunk_index").unwrap_or(0),
                text: get_str(&r.metadata, "text").unwrap_or_default(),
            })
            .collect();
        chunks.sort_by_key(|c| (c.page, c.chunk_index));

        let anchor_pos = chunks
            .iter()
            .position(|c| c.chunk_id == request.anchor_chunk_id)
            .ok_or_else(|| ApiError::NotFound("anchor_chunk_not_found".to_string()))?;

        let start = anchor_pos.saturating_sub(request.window_before as usize);
        let end = (anchor_pos + request.window_after as usize + 1).min(chunks.len());
        Ok(ChunkWindowResponse {
            chunks: chunks[start..end].to_vec(),
        })
    }
}

fn apply_rerank(
    mut sections: Vec<RetrievalHit>,
    scores: &HashMap<String, f32>,
    threshold: f32,
    top_n: usize,
    max_total_sections: usize,
) -> Vec<RetrievalHit> {
    for hit in &mut sections {
        let key = hit
            .section_id
            .as_deref()
            .map(|sid| rerank_key(&hit.doc_id, sid));
        let score = key.and_then(|k| scores.get(&k).copied());
        hit.rerank_score = Some(score.unwrap_or_else(|| hit.rerank_score.unwrap_or(0.0)));
    }
    sections.sort_by(|a, b| {
        cmp_f32_desc(a.rerank_score.unwrap_or(0.0), b.rerank_score.unwrap_or(0.0))
            .then_with(|| cmp_hits(a, b))
    });
    // top-n first, then the section cap (source order of operations)
    if top_n > 0 {
        sections.truncate(top_n);
    }
    sections.retain(|h| h.rerank_score.unwrap_or(0.0) >= threshold);
    sections.truncate(max_total_sections);
    sections
}

/// Deterministic tie-breaks: rerank desc, section cosine desc, doc cosine
/// desc, then lexicographic ids
fn cmp_hits(a: &RetrievalHit, b: &RetrievalHit) -> Ordering {
    cmp_f32_desc(a.rerank_score.unwrap_or(0.0), b.rerank_score.unwrap_or(0.0))
        .then(cmp_f32_desc(a.score, b.score))
        .then(cmp_f32_desc(
            a.doc_score.unwrap_or(a.score),
            b.doc_score.unwrap_or(b.score),
        ))
        .then_with(|| a.doc_id.cmp(&b.doc_id))
        .then_with(|| a.section_id.cmp(&b.section_id))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

fn get_str(meta: &JsonMap, key: &str) -> Option<String> {
    meta.get(key).and_then(Value::as_str).map(|s| s.to_string())
}

fn get_u32(meta: &JsonMap, key: &str) -> Option<u32> {
    meta.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

fn get_string_list(meta: &JsonMap, key: &str) -> Option<Vec<String>> {
    match meta.get(key)? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect(),
        ),
        Value::String(s) => Some(s.split(',').map(|t| t.trim().to_string()).collect()),
        _ => None,
    }
}

fn doc_hit(meta: &JsonMap, score: f32) -> RetrievalHit {
    RetrievalHit {
        doc_id: get_str(meta, "doc_id").unwrap_or_default(),
        score,
        doc_score: Some(score),
        title: get_str(meta, "title"),
        summary: get_str(meta, "summary"),
        ..Default::default()
    }
}

fn section_hit(meta: &JsonMap, score: f32, doc_score: f32) -> RetrievalHit {
    RetrievalHit {
        doc_id: get_str(meta, "doc_id").unwrap_or_default(),
        section_id: get_str(meta, "section_id"),
        score,
        doc_score: Some(doc_score),
        title: get_str(meta, "title"),
        summary: get_str(meta, "summary"),
        page_start: get_u32(meta, "page_start"),
        page_end: get_u32(meta, "page_end"),
        chunk_ids: get_string_list(meta, "chunk_ids"),
        anchor_chunk_id: get_str(meta, "anchor_chunk_id"),
        ..Default::default()
    }
}

/// Chunk hits inherit title/summary/anchor metadata from the owning
/// section; raw chunk text never leaves the index
fn chunk_hit(
    meta: &JsonMap,
    score: f32,
    by_section: &HashMap<String, &RetrievalHit>,
) -> Option<RetrievalHit> {
    let doc_id = get_str(meta, "doc_id")?;
    let section_id = get_str(meta, "section_id")?;
    let parent = by_section.get(&rerank_key(&doc_id, &section_id));
    Some(RetrievalHit {
        doc_id,
        section_id: Some(section_id),
        chunk_id: get_str(meta, "chunk_id"),
        score,
        rerank_score: parent.and_then(|p| p.rerank_score),
        doc_score: parent.and_then(|p| p.doc_score),
        title: parent.and_then(|p| p.title.clone()),
        summary: parent.and_then(|p| p.summary.clone()),
        page_start: parent.and_then(|p| p.page_start),
        page_end: parent.and_then(|p| p.page_end),
        chunk_ids: parent.and_then(|p| p.chunk_ids.clone()),
        anchor_chunk_id: parent.and_then(|p| p.anchor_chunk_id.clone()),
        page: get_u32(meta, "page"),
        chunk_index: get_u32(meta, "chunk_index"),
    })
}
