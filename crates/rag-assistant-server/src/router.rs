use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use crate::catalog::{seed::seed_demo_data, DocumentStore};
use crate::config::{Settings, SettingsHandle};
use crate::handlers;
use crate::services::reranker::{LlmReranker, Reranker};
use crate::services::safety::HttpSafeguard;
use crate::services::{
    EmbeddingClient, InMemoryVectorIndex, LlmRuntime, Orchestrator, Retriever, RuntimeClient,
    SafetyFilter, VectorIndexGateway,
};
use crate::state::AppState;
use crate::tools::rate_limit::ToolRateLimiter;
use crate::tools::ToolRegistry;

/// Wire every service from one settings snapshot. Mock mode seeds the
/// demo corpus so the whole pipeline runs hermetically.
pub async fn build_state(settings: Settings) -> Result<Arc<AppState>> {
    let mock_mode = settings.mock_mode;

    let embedding = Arc::new(EmbeddingClient::new(settings.embedding.clone(), mock_mode));
    let index = Arc::new(InMemoryVectorIndex::new());
    let gateway = Arc::new(VectorIndexGateway::new(index, embedding));
    let store = Arc::new(DocumentStore::new());
    if mock_mode {
        seed_demo_data(&store, &gateway, settings.embedding.dimension).await?;
        info!("mock corpus seeded");
    }

    let reranker: Option<Arc<dyn Reranker>> =
        Some(Arc::new(LlmReranker::from_config(&settings.retrieval)));
    let retriever = Arc::new(Retriever::new(gateway, reranker));
    let tools = Arc::new(ToolRegistry::new(store, retriever.clone()));
    let runtime: Arc<dyn LlmRuntime> =
        Arc::new(RuntimeClient::new(settings.runtime.clone(), mock_mode));
    let orchestrator = Arc::new(Orchestrator::new(retriever.clone(), runtime, tools.clone()));
    let safety = Arc::new(SafetyFilter::new(HttpSafeguard::from_config(&settings.safety)));

    Ok(Arc::new(AppState {
        settings: Arc::new(SettingsHandle::new(settings)),
        safety,
        retriever,
        orchestrator,
        tools,
        gateway_limiter: Arc::new(ToolRateLimiter::new()),
    }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/api/v1/assistant/query", post(handlers::assistant::query_handler));

    // Internal request/response surfaces get a bounded timeout; the
    // orchestrator path may sit on the upstream LLM and stays unbounded
    let internal_bounded = Router::new()
        .route("/internal/retrieval/search", post(handlers::retrieval::search_handler))
        .route(
            "/internal/retrieval/chunks/window",
            post(handlers::retrieval::chunk_window_handler),
        )
        .route(
            "/internal/retrieval/config",
            get(handlers::retrieval::get_config_handler)
                .post(handlers::retrieval::update_config_handler),
        )
        .route("/internal/mcp/execute", post(handlers::mcp::execute_handler))
        .route(
            "/internal/safety/input-check",
            post(handlers::safety::input_check_handler),
        )
        .route(
            "/internal/safety/output-check",
            post(handlers::safety::output_check_handler),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    let orchestrator_routes = Router::new()
        .route(
            "/internal/orchestrator/respond",
            post(handlers::respond::respond_handler),
        )
        .route(
            "/internal/orchestrator/config",
            get(handlers::respond::get_config_handler)
                .post(handlers::respond::update_config_handler),
        );

    Router::new()
        .merge(public_routes)
        .merge(internal_bounded)
        .merge(orchestrator_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}
