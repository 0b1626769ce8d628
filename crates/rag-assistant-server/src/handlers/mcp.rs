use std::sync::Arc;

use axum::{extract::State, Json};

use crate::models::mcp::{McpExecuteRequest, McpExecuteResponse};
use crate::state::AppState;

/// POST /internal/mcp/execute — the envelope carries success and failure
/// alike; HTTP status stays 200 so callers branch on `status`
pub async fn execute_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<McpExecuteRequest>,
) -> Json<McpExecuteResponse> {
    let settings = state.settings.snapshot();
    let response = state.tools.execute(&request, &settings.proxy).await;
    Json(response)
}
