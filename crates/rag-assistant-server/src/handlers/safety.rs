use std::sync::Arc;

use axum::{extract::State, Json};

use crate::models::safety::{InputCheckRequest, OutputCheckRequest, SafetyDecision};
use crate::state::AppState;

/// POST /internal/safety/input-check
pub async fn input_check_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InputCheckRequest>,
) -> Json<SafetyDecision> {
    let settings = state.settings.snapshot();
    let decision = state.safety.check_input(&request, &settings.safety).await;
    Json(decision)
}

/// POST /internal/safety/output-check
pub async fn output_check_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OutputCheckRequest>,
) -> Json<SafetyDecision> {
    let settings = state.settings.snapshot();
    let decision = state.safety.check_output(&request, &settings.safety).await;
    Json(decision)
}
