use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::HeaderMap, Json};
use tracing::info;

use crate::models::orchestrator::{
    AssistantQueryRequest, AssistantResponse, AssistantResponseMeta, OrchestratorRequest,
    SafetyBlock,
};
use crate::models::safety::{InputCheckRequest, OutputCheckRequest, SafetyMeta};
use crate::models::UserContext;
use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::trace::{resolve_tenant, resolve_trace_id};

const USER_HEADER: &str = "x-user-id";

/// POST /api/v1/assistant/query — the outer shell: safety on the way in,
/// orchestrator, safety on the way out
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AssistantQueryRequest>,
) -> Result<Json<AssistantResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query cannot be empty".to_string()));
    }

    let settings = state.settings.snapshot();
    let started = Instant::now();
    let trace_id = resolve_trace_id(&headers);
    let tenant_id = resolve_tenant(&headers)
        .unwrap_or_else(|| settings.orchestrator.default_tenant_id.clone());
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| settings.orchestrator.default_user_id.clone());
    let user = UserContext::new(user_id, tenant_id);

    state.gateway_limiter.check_calls(
        &format!("assistant:{}:{}", user.tenant_id, user.user_id),
        settings.gateway.rate_limit_requests,
        settings.gateway.rate_limit_period_seconds,
    )?;

    info!(
        trace_id = %trace_id,
        tenant_id = %user.tenant_id,
        "assistant_query"
    );

    // Input gate
    let input_decision = state
        .safety
        .check_input(
            &InputCheckRequest {
                query: request.query.clone(),
                user: Some(user.clone()),
                meta: Some(SafetyMeta {
                    trace_id: Some(trace_id.clone()),
                }),
            },
            &settings.safety,
        )
        .await;
    if input_decision.is_blocked() {
        return Err(ApiError::policy("safety_blocked", input_decision.message));
    }
    let query = input_decision
        .transformed_text
        .clone()
        .unwrap_or_else(|| request.query.clone());

    // Orchestrate
    let context = request.context.as_ref();
    let orchestrator_request = OrchestratorRequest {
        query: query.clone(),
        user: Some(user.clone()),
        trace_id: Some(trace_id.clone()),
        channel: context.and_then(|c| c.channel.clone()),
        doc_ids: context.and_then(|c| c.doc_ids.clone()),
        safety: Some(input_decision.status.as_str().to_string()),
        ..Default::default()
    };
    let mut response = state
        .orchestrator
        .respond(&orchestrator_request, &settings)
        .await?;

    // Output gate
    let output_decision = state
        .safety
        .check_output(
            &OutputCheckRequest {
                query,
                answer: response.answer.clone(),
                user: Some(user),
                meta: Some(SafetyMeta {
                    trace_id: Some(trace_id.clone()),
                }),
            },
            &settings.safety,
        )
        .await;
    if output_decision.is_blocked() {
        return Err(ApiError::policy("safety_blocked", output_decision.message));
    }
    if let Some(sanitized) = output_decision.transformed_text {
        response.answer = sanitized;
    }

    Ok(Json(AssistantResponse {
        answer: response.answer,
        sources: response.sources,
        meta: AssistantResponseMeta {
            trace_id,
            safety: SafetyBlock {
                input: Some(input_decision.status.as_str().to_string()),
                output: Some(output_decision.status.as_str().to_string()),
            },
            latency_ms: Some(started.elapsed().as_millis() as u64),
        },
    }))
}
