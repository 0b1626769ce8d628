use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::models::retrieval::{ChunkWindowRequest, ChunkWindowResponse, RetrievalQuery, RetrievalResponse};
use crate::state::AppState;
use crate::utils::error::ApiError;

/// Hard ceiling on results per search, independent of configuration
const MAX_RESULTS_CEILING: usize = 50;

/// POST /internal/retrieval/search
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(mut query): Json<RetrievalQuery>,
) -> Result<Json<RetrievalResponse>, ApiError> {
    if query.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query cannot be empty".to_string()));
    }
    if query.tenant_id.trim().is_empty() {
        return Err(ApiError::BadRequest("tenant_id is required".to_string()));
    }

    let settings = state.settings.snapshot();
    let config = &settings.retrieval;

    let requested = query.max_results.unwrap_or(config.max_results);
    query.max_results = Some(requested.min(config.max_results.max(1)).min(MAX_RESULTS_CEILING));

    info!(
        tenant_id = %query.tenant_id,
        max_results = query.max_results,
        filters = query.filters.is_some(),
        doc_ids = query.doc_ids.is_some(),
        "retrieval_http_request"
    );

    let response = state.retriever.search(&query, config).await?;
    Ok(Json(response))
}

/// POST /internal/retrieval/chunks/window
pub async fn chunk_window_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChunkWindowRequest>,
) -> Result<Json<ChunkWindowResponse>, ApiError> {
    if request.tenant_id.trim().is_empty() || request.doc_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "tenant_id, doc_id, anchor_chunk_id required".to_string(),
        ));
    }
    let response = state.retriever.chunk_window(&request).await?;
    Ok(Json(response))
}

fn retrieval_config_view(state: &AppState) -> Value {
    let settings = state.settings.snapshot();
    let r = &settings.retrieval;
    json!({
        "docs_top_k": r.docs_top_k,
        "sections_top_k_per_doc": r.sections_top_k_per_doc,
        "max_total_sections": r.max_total_sections,
        "chunk_top_k": r.chunk_top_k,
        "topk_per_doc": r.topk_per_doc,
        "min_docs": r.min_docs,
        "enable_section_cosine": r.enable_section_cosine,
        "enable_rerank": r.enable_rerank,
        "rerank_score_threshold": r.rerank_score_threshold,
        "rerank_model": r.rerank_model,
        "rerank_top_n": r.rerank_top_n,
        "chunks_enabled": r.chunks_enabled,
        "enable_filters": r.enable_filters,
        "max_results": r.max_results,
    })
}

/// GET /internal/retrieval/config
pub async fn get_config_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(retrieval_config_view(&state))
}

/// POST /internal/retrieval/config
pub async fn update_config_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Map<String, Value>>,
) -> Json<Value> {
    state
        .settings
        .update(|settings| settings.apply_retrieval_update(&payload));
    Json(retrieval_config_view(&state))
}
