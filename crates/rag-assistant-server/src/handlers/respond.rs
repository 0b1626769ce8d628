use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::models::orchestrator::{OrchestratorRequest, OrchestratorResponse};
use crate::state::AppState;
use crate::utils::error::ApiError;

/// POST /internal/orchestrator/respond
pub async fn respond_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OrchestratorRequest>,
) -> Result<Json<OrchestratorResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query cannot be empty".to_string()));
    }
    // One snapshot per request; admin updates don't affect us mid-flight
    let settings = state.settings.snapshot();
    let response = state.orchestrator.respond(&request, &settings).await?;
    Ok(Json(response))
}

fn orchestrator_config_view(state: &AppState) -> Value {
    let settings = state.settings.snapshot();
    let orch = &settings.orchestrator;
    json!({
        "default_model": orch.default_model,
        "prompt_token_budget": orch.prompt_token_budget,
        "context_token_budget": orch.context_token_budget,
        "max_tool_steps": orch.max_tool_steps,
        "window_radius": orch.window_radius,
        "mock_mode": settings.mock_mode,
    })
}

/// GET /internal/orchestrator/config
pub async fn get_config_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(orchestrator_config_view(&state))
}

/// POST /internal/orchestrator/config — publishes a new settings snapshot
pub async fn update_config_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Map<String, Value>>,
) -> Json<Value> {
    info!(keys = ?payload.keys().collect::<Vec<_>>(), "orchestrator_config_update");
    state.settings.update(|settings| {
        settings.apply_orchestrator_update(&payload);
        settings.apply_proxy_update(&payload);
        settings.apply_safety_update(&payload);
    });
    Json(orchestrator_config_view(&state))
}
