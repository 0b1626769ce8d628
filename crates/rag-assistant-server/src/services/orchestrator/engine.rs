use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::models::mcp::McpExecuteRequest;
use crate::models::orchestrator::{
    OrchestratorRequest, OrchestratorResponse, SafetyBlock, Telemetry, ToolCallTrace, UsageStats,
};
use crate::models::retrieval::RetrievalQuery;
use crate::models::{JsonMap, UserContext};
use crate::services::retriever::Retriever;
use crate::services::runtime::{LlmRuntime, RuntimePayload, RuntimeResult};
use crate::tools::ToolRegistry;
use crate::utils::error::ApiError;
use crate::utils::token_estimator::BYTES_PER_TOKEN;
use crate::utils::trace::or_new_trace_id;

use super::context::{build_context, compose_messages, tool_schemas, BuiltContext};
use super::window::ProgressiveWindowState;

/// Everything request-scoped lives here and dies with the request
struct RequestState {
    prompt_tokens: u64,
    completion_tokens: u64,
    tool_tokens: usize,
    traces: Vec<ToolCallTrace>,
    seen: HashSet<(String, String, String, u32, u32)>,
    window: ProgressiveWindowState,
}

impl RequestState {
    fn new(window_radius: u32) -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            tool_tokens: 0,
            traces: Vec::new(),
            seen: HashSet::new(),
            window: ProgressiveWindowState::new(window_radius),
        }
    }

    fn tokens_used(&self) -> usize {
        self.prompt_tokens as usize + self.completion_tokens as usize + self.tool_tokens
    }
}

struct ToolOutcome {
    message: String,
    tokens: usize,
    trace: ToolCallTrace,
}

/// Drives one request through RETRIEVE -> BUILD_CONTEXT -> LOOP_STEP with
/// strict token/step budgets. The loop is sequential: one runtime call,
/// optionally one tool call, repeat.
pub struct Orchestrator {
    retriever: Arc<Retriever>,
    runtime: Arc<dyn LlmRuntime>,
    tools: Arc<ToolRegistry>,
}

impl Orchestrator {
    pub fn new(
        retriever: Arc<Retriever>,
        runtime: Arc<dyn LlmRuntime>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            retriever,
            runtime,
            tools,
        }
    }

    pub async fn respond(
        &self,
        request: &OrchestratorRequest,
        settings: &Settings,
    ) -> Result<OrchestratorResponse, ApiError> {
        let user = resolve_user(request, settings);
        let trace_id = or_new_trace_id(request.trace_id.as_deref());
        let orch = &settings.orchestrator;

        // RETRIEVE
        let retrieval_query = retrieval_query(request, &user);
        let retrieval_start = Instant::now();
        let retrieval = self
            .retriever
            .search(&retrieval_query, &settings.retrieval)
            .await?;
        let retrieval_latency_ms = retrieval_start.elapsed().as_millis() as u64;
        info!(
            trace_id = %trace_id,
            hits = retrieval.hits.len(),
            docs = retrieval.steps.docs.len(),
            sections = retrieval.steps.sections.len(),
            chunks = retrieval.steps.chunks.len(),
            latency_ms = retrieval_latency_ms,
            "orchestrator_retrieval"
        );

        // BUILD_CONTEXT
        let built = build_context(&retrieval.hits, orch.prompt_token_budget);
        let mut messages = compose_messages(&request.query, &built.items);
        let context_payload: Vec<Value> = built
            .items
            .iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect();
        let schemas = tool_schemas(orch.window_radius);

        // LOOP_STEP
        let mut state = RequestState::new(orch.window_radius);
        let mut llm_latency_ms = 0u64;
        let mut answer: Option<String> = None;

        for step in 0..=orch.max_tool_steps {
            let payload = RuntimePayload {
                model: orch.default_model.clone(),
                messages: messages.clone(),
                tools: schemas.clone(),
                context: context_payload.clone(),
                max_tokens: settings.runtime.max_completion_tokens,
                temperature: settings.runtime.temperature,
            };
            let llm_start = Instant::now();
            let result = self.runtime.chat(&payload).await?;
            llm_latency_ms += llm_start.elapsed().as_millis() as u64;

            let usage = result.usage();
            state.prompt_tokens += usage.prompt;
            state.completion_tokens += usage.completion;
            check_budget(&state, orch.context_token_budget)?;

            match result {
                RuntimeResult::Message { content, .. } => {
                    answer = Some(content);
                    break;
                }
                RuntimeResult::ToolCall { name, arguments, .. } => {
                    if step == orch.max_tool_steps {
                        return Err(ApiError::policy(
                            "LLM_LIMIT_EXCEEDED",
                            "Tool-call limit reached",
                        ));
                    }
                    let outcome = self
                        .execute_tool(
                            &name,
                            &arguments,
                            &built.section_chunk_map,
                            &mut state,
                            &user,
                            &trace_id,
                            settings,
                        )
                        .await?;
                    messages.push(crate::models::ChatMessage::assistant(outcome.message));
                    state.tool_tokens += outcome.tokens;
                    state.traces.push(outcome.trace);
                    check_budget(&state, orch.context_token_budget)?;
                }
            }
        }

        let answer =
            answer.ok_or_else(|| ApiError::policy("LLM_LOOP", "No final answer"))?;

        Ok(self.final_response(
            answer,
            built,
            state,
            trace_id,
            retrieval_latency_ms,
            llm_latency_ms,
            request,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_tool(
        &self,
        requested_tool: &str,
        args: &JsonMap,
        section_chunk_map: &HashMap<String, String>,
        state: &mut RequestState,
        user: &UserContext,
        trace_id: &str,
        settings: &Settings,
    ) -> Result<ToolOutcome, ApiError> {
        let passthrough = matches!(
            requested_tool,
            "read_doc_metadata" | "doc_local_search" | "read_doc_pages" | "list_available_tools"
        );

        let (tool_name, call_args) = if passthrough {
            (requested_tool.to_string(), args.clone())
        } else {
            let Some(doc_id) = args.get("doc_id").and_then(Value::as_str) else {
                return Ok(model_facing_error(
                    requested_tool,
                    args,
                    "doc_id missing in tool arguments",
                ));
            };
            let section_id = args
                .get("section_id")
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            let anchor = args
                .get("anchor_chunk_id")
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .or_else(|| {
                    section_id
                        .as_deref()
                        .and_then(|sid| section_chunk_map.get(sid).cloned())
                });

            match anchor {
                Some(anchor) => {
                    let (before, after) = self.resolve_window(args, section_id.as_deref(), &anchor, state);
                    let seen_key = (
                        doc_id.to_string(),
                        section_id.clone().unwrap_or_default(),
                        anchor.clone(),
                        before,
                        after,
                    );
                    if !state.seen.insert(seen_key) {
                        // Repeated identical request: replay the note instead
                        // of fetching again; the step is still consumed
                        debug!(doc_id, anchor = %anchor, before, after, "tool_repeat_suppressed");
                        return Ok(ToolOutcome {
                            message: "TOOL_RESULT:{\"note\":\"observation unchanged; this window was already fetched, answer from what you have\"}"
                                .to_string(),
                            tokens: 0,
                            trace: ToolCallTrace {
                                name: "read_chunk_window".to_string(),
                                arguments: Value::Object(args.clone()),
                                result_summary: "observation unchanged".to_string(),
                            },
                        });
                    }

                    let mut call_args = Map::new();
                    call_args.insert("doc_id".to_string(), Value::String(doc_id.to_string()));
                    call_args.insert("anchor_chunk_id".to_string(), Value::String(anchor));
                    call_args.insert("window_before".to_string(), Value::from(before));
                    call_args.insert("window_after".to_string(), Value::from(after));
                    ("read_chunk_window".to_string(), call_args)
                }
                None => {
                    let Some(section_id) = section_id else {
                        return Ok(model_facing_error(
                            requested_tool,
                            args,
                            "section_id missing and no anchor chunk known",
                        ));
                    };
                    let mut call_args = Map::new();
                    call_args.insert("doc_id".to_string(), Value::String(doc_id.to_string()));
                    call_args.insert("section_id".to_string(), Value::String(section_id));
                    ("read_doc_section".to_string(), call_args)
                }
            }
        };

        let response = self
            .tools
            .execute(
                &McpExecuteRequest {
                    tool_name: tool_name.clone(),
                    arguments: call_args.clone(),
                    user: user.clone(),
                    trace_id: Some(trace_id.to_string()),
                },
                &settings.proxy,
            )
            .await;

        if response.is_ok() {
            let result = response.result.unwrap_or(Value::Null);
            let text = extract_result_text(&result);
            let tokens = text.len() / BYTES_PER_TOKEN;
            let serialized = result.to_string();
            Ok(ToolOutcome {
                message: format!("TOOL_RESULT:{serialized}"),
                tokens,
                trace: ToolCallTrace {
                    name: tool_name,
                    arguments: Value::Object(call_args),
                    result_summary: clip(&text, 200),
                },
            })
        } else {
            let error = response
                .error
                .unwrap_or_else(|| crate::models::mcp::McpError {
                    code: "TOOL_ERROR".to_string(),
                    message: "tool failed without detail".to_string(),
                });
            match error.code.as_str() {
                // Unrecoverable tool errors terminate the loop
                "ACCESS_DENIED" => Err(ApiError::AccessDenied(error.message)),
                "RATE_LIMIT_EXCEEDED" => Err(ApiError::RateLimited(error.message)),
                _ => {
                    // The model may choose another action within its budget;
                    // the step is consumed
                    warn!(tool = %tool_name, code = %error.code, "tool_error_returned_to_model");
                    Ok(ToolOutcome {
                        message: format!("TOOL_ERROR:{}", error.message),
                        tokens: 0,
                        trace: ToolCallTrace {
                            name: tool_name,
                            arguments: Value::Object(call_args),
                            result_summary: format!("error: {}", error.code),
                        },
                    })
                }
            }
        }
    }

    /// Explicit model-supplied radii are clamped to the cap; without them
    /// the progressive window decides
    fn resolve_window(
        &self,
        args: &JsonMap,
        section_id: Option<&str>,
        anchor: &str,
        state: &mut RequestState,
    ) -> (u32, u32) {
        let radius = args.get("radius").and_then(Value::as_u64).map(|v| v as u32);
        let before = args
            .get("window_before")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .or(radius);
        let after = args
            .get("window_after")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .or(radius);

        match (before, after) {
            (None, None) => {
                let key = section_id.unwrap_or(anchor);
                let r = state.window.next(key);
                (r, r)
            }
            (b, a) => (
                state.window.clamp(b.unwrap_or(0)),
                state.window.clamp(a.unwrap_or(0)),
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn final_response(
        &self,
        answer: String,
        built: BuiltContext,
        state: RequestState,
        trace_id: String,
        retrieval_latency_ms: u64,
        llm_latency_ms: u64,
        request: &OrchestratorRequest,
    ) -> OrchestratorResponse {
        let tool_steps = state.traces.len();
        OrchestratorResponse {
            answer,
            sources: built.sources,
            tools: state.traces,
            safety: SafetyBlock {
                input: Some(request.safety.clone().unwrap_or_else(|| "allowed".to_string())),
                output: None,
            },
            telemetry: Telemetry {
                trace_id,
                retrieval_latency_ms: Some(retrieval_latency_ms),
                llm_latency_ms: Some(llm_latency_ms),
                tool_steps,
            },
            used_tokens: UsageStats {
                prompt: state.prompt_tokens,
                completion: state.completion_tokens,
            },
        }
    }
}

fn resolve_user(request: &OrchestratorRequest, settings: &Settings) -> UserContext {
    if let Some(user) = &request.user {
        return user.clone();
    }
    if let (Some(user_id), Some(tenant_id)) = (&request.user_id, &request.tenant_id) {
        return UserContext::new(user_id.clone(), tenant_id.clone());
    }
    UserContext::new(
        settings.orchestrator.default_user_id.clone(),
        settings.orchestrator.default_tenant_id.clone(),
    )
}

fn retrieval_query(request: &OrchestratorRequest, user: &UserContext) -> RetrievalQuery {
    RetrievalQuery {
        query: request.query.clone(),
        tenant_id: user.tenant_id.clone(),
        max_results: request.max_results,
        filters: request.filters.clone(),
        doc_ids: request.doc_ids.clone(),
        section_ids: request.section_ids.clone(),
        docs_top_k: request.docs_top_k,
        sections_top_k_per_doc: request.sections_top_k_per_doc,
        max_total_sections: request.max_total_sections,
        enable_section_cosine: request.enable_section_cosine,
        enable_rerank: request.enable_rerank,
        rerank_score_threshold: request.rerank_score_threshold,
        chunks_enabled: request.chunks_enabled,
        enable_filters: request.enable_filters,
        trace_id: request.trace_id.clone(),
    }
}

fn check_budget(state: &RequestState, budget: usize) -> Result<(), ApiError> {
    if state.tokens_used() > budget {
        return Err(ApiError::policy(
            "CONTEXT_BUDGET_EXCEEDED",
            format!("{} tokens used, budget is {budget}", state.tokens_used()),
        ));
    }
    Ok(())
}

fn model_facing_error(tool: &str, args: &JsonMap, message: &str) -> ToolOutcome {
    ToolOutcome {
        message: format!("TOOL_ERROR:{message}"),
        tokens: 0,
        trace: ToolCallTrace {
            name: tool.to_string(),
            arguments: Value::Object(args.clone()),
            result_summary: format!("error: {message}"),
        },
    }
}

fn extract_result_text(result: &Value) -> String {
    if let Some(text) = result.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    if let Some(chunks) = result.get("chunks").and_then(Value::as_array) {
        return chunks
            .iter()
            .filter_map(|c| c.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
    }
    if let Some(snippets) = result.get("snippets").and_then(Value::as_array) {
        return snippets
            .iter()
            .filter_map(|s| s.get("snippet").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
    }
    String::new()
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.is_empty() {
        return "(no text)".to_string();
    }
    text.chars().take(max_chars).collect()
}
