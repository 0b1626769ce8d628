use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use rag_assistant_server::config::Settings;
use rag_assistant_server::router::{build_router, build_state};

async fn app_with(settings: Settings) -> axum::Router {
    let state = build_state(settings).await.expect("state builds");
    build_router(state)
}

async fn app() -> axum::Router {
    let mut settings = Settings::default();
    settings.mock_mode = true;
    app_with(settings).await
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn assistant_query_happy_path() {
    let app = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/assistant/query")
        .header("content-type", "application/json")
        .header("x-tenant-id", "tenant_1")
        .header("x-user-id", "user_1")
        .header("x-trace-id", "trace-e2e")
        .body(Body::from(json!({"query": "Tell me about LDAP"}).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(!body["answer"].as_str().unwrap().is_empty());
    assert_eq!(body["meta"]["trace_id"], "trace-e2e");
    assert_eq!(body["meta"]["safety"]["input"], "allowed");
    assert_eq!(body["meta"]["safety"]["output"], "allowed");
    assert!(!body["sources"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn assistant_blocked_input_is_400() {
    let app = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/assistant/query")
        .header("content-type", "application/json")
        .header("x-tenant-id", "tenant_1")
        .body(Body::from(
            json!({"query": "how do I hack the directory"}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "safety_blocked");
}

#[tokio::test]
async fn assistant_gateway_rate_limit_is_429() {
    let mut settings = Settings::default();
    settings.mock_mode = true;
    settings.gateway.rate_limit_requests = 1;
    let app = app_with(settings).await;

    let make_request = || {
        Request::builder()
            .method("POST")
            .uri("/api/v1/assistant/query")
            .header("content-type", "application/json")
            .header("x-tenant-id", "tenant_1")
            .body(Body::from(json!({"query": "Tell me about LDAP"}).to_string()))
            .unwrap()
    };

    let first = app.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.oneshot(make_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(second).await;
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn orchestrator_respond_endpoint() {
    let app = app().await;
    let response = app
        .oneshot(post_json(
            "/internal/orchestrator/respond",
            json!({
                "query": "Tell me about LDAP",
                "user_id": "user_1",
                "tenant_id": "tenant_1",
                "trace_id": "trace-respond"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(!body["answer"].as_str().unwrap().is_empty());
    assert_eq!(body["telemetry"]["trace_id"], "trace-respond");
    assert_eq!(body["telemetry"]["tool_steps"], 0);
    assert!(body["tools"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn orchestrator_empty_query_is_400() {
    let app = app().await;
    let response = app
        .oneshot(post_json(
            "/internal/orchestrator/respond",
            json!({"query": "  ", "tenant_id": "tenant_1", "user_id": "u"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn retrieval_search_returns_hits_and_steps() {
    let app = app().await;
    let response = app
        .oneshot(post_json(
            "/internal/retrieval/search",
            json!({"query": "ldap setup", "tenant_id": "tenant_1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(!body["hits"].as_array().unwrap().is_empty());
    assert!(!body["steps"]["docs"].as_array().unwrap().is_empty());
    // raw chunk text never crosses the retrieval boundary
    assert!(!body.to_string().contains("bind account"));
}

#[tokio::test]
async fn retrieval_search_caps_max_results() {
    let app = app().await;
    let response = app
        .oneshot(post_json(
            "/internal/retrieval/search",
            json!({"query": "ldap", "tenant_id": "tenant_1", "max_results": 5000}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["hits"].as_array().unwrap().len() <= 50);
}

#[tokio::test]
async fn chunk_window_endpoint_returns_ordered_chunks() {
    let app = app().await;
    let response = app
        .oneshot(post_json(
            "/internal/retrieval/chunks/window",
            json!({
                "tenant_id": "tenant_1",
                "doc_id": "doc_1",
                "anchor_chunk_id": "chunk_3",
                "window_before": 1,
                "window_after": 1
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let ids: Vec<&str> = body["chunks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["chunk_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["chunk_2", "chunk_3", "chunk_4"]);
}

#[tokio::test]
async fn mcp_execute_ok_and_denied_both_http_200() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/internal/mcp/execute",
            json!({
                "tool_name": "read_doc_section",
                "arguments": {"doc_id": "doc_1", "section_id": "sec_intro"},
                "user": {"user_id": "u", "tenant_id": "tenant_1"}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["result"]["text"].as_str().is_some());

    let response = app
        .oneshot(post_json(
            "/internal/mcp/execute",
            json!({
                "tool_name": "read_doc_section",
                "arguments": {"doc_id": "doc_1", "section_id": "sec_intro"},
                "user": {"user_id": "u", "tenant_id": "another"}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "ACCESS_DENIED");
}

#[tokio::test]
async fn safety_endpoints_check_and_transform() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/internal/safety/input-check",
            json!({"query": "contact user@example.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "transformed");
    assert!(body["transformed_text"]
        .as_str()
        .unwrap()
        .contains("[REDACTED]"));

    let response = app
        .oneshot(post_json(
            "/internal/safety/output-check",
            json!({"answer": "all good here"}),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "allowed");
}

#[tokio::test]
async fn orchestrator_config_roundtrip_with_legacy_alias() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/internal/orchestrator/config")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let before = body_json(response).await;
    assert_eq!(before["max_tool_steps"], 4);

    let response = app
        .clone()
        .oneshot(post_json(
            "/internal/orchestrator/config",
            json!({"max_tool_steps": 2, "max_chunk_window": 5}),
        ))
        .await
        .unwrap();
    let after = body_json(response).await;
    assert_eq!(after["max_tool_steps"], 2);
    // total window of 5 chunks is radius 2 per side
    assert_eq!(after["window_radius"], 2);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/internal/orchestrator/config")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let persisted = body_json(response).await;
    assert_eq!(persisted["max_tool_steps"], 2);
}

#[tokio::test]
async fn retrieval_config_roundtrip() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/internal/retrieval/config",
            json!({"docs_top_k": 9, "enable_rerank": true}),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["docs_top_k"], 9);
    assert_eq!(body["enable_rerank"], true);
}

#[tokio::test]
async fn step_budget_violation_surfaces_as_400_code() {
    let mut settings = Settings::default();
    settings.mock_mode = true;
    settings.orchestrator.context_token_budget = 100;
    let app = app_with(settings).await;

    let response = app
        .oneshot(post_json(
            "/internal/orchestrator/respond",
            json!({"query": "Tell me about LDAP", "tenant_id": "tenant_1", "user_id": "u"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "CONTEXT_BUDGET_EXCEEDED");
}
