use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::config::RuntimeConfig;
use crate::models::{ChatMessage, JsonMap};
use crate::utils::error::ApiError;

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt: u64,
    pub completion: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }
}

/// Either a final assistant message or a structured tool call; never both
#[derive(Debug, Clone)]
pub enum RuntimeResult {
    Message { content: String, usage: Usage },
    ToolCall { name: String, arguments: JsonMap, usage: Usage },
}

impl RuntimeResult {
    pub fn usage(&self) -> &Usage {
        match self {
            RuntimeResult::Message { usage, .. } => usage,
            RuntimeResult::ToolCall { usage, .. } => usage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimePayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<Value>,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Stateless translator between the orchestrator and a chat-completions
/// endpoint
#[async_trait]
pub trait LlmRuntime: Send + Sync {
    async fn chat(&self, payload: &RuntimePayload) -> Result<RuntimeResult, ApiError>;
}

pub struct RuntimeClient {
    client: Client,
    config: RuntimeConfig,
    mock_mode: bool,
}

impl RuntimeClient {
    pub fn new(config: RuntimeConfig, mock_mode: bool) -> Self {
        let mut builder = Client::builder();
        // no default timeout toward the upstream LLM unless configured
        if let Some(secs) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Self {
            client: builder.build().unwrap_or_else(|_| Client::new()),
            config,
            mock_mode,
        }
    }

    fn resolve_url(&self) -> Option<String> {
        let url = self.config.base_url.as_deref()?;
        let stripped = url.trim_end_matches('/');
        if stripped.ends_with("/v1") {
            Some(format!("{stripped}/chat/completions"))
        } else {
            Some(stripped.to_string())
        }
    }

    fn mock_response(payload: &RuntimePayload) -> RuntimeResult {
        let last = payload
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if last.to_uppercase().contains("TOOL_CALL") {
            let mut arguments = Map::new();
            arguments.insert("doc_id".to_string(), Value::String("doc_1".to_string()));
            arguments.insert("section_id".to_string(), Value::String("sec_intro".to_string()));
            return RuntimeResult::ToolCall {
                name: "read_doc_section".to_string(),
                arguments,
                usage: Usage {
                    prompt: 200,
                    completion: 50,
                },
            };
        }

        let combined: String = payload
            .context
            .iter()
            .filter_map(|item| {
                item.get("summary")
                    .or_else(|| item.get("title"))
                    .and_then(Value::as_str)
            })
            .collect::<Vec<_>>()
            .join(" ");
        let content = if combined.is_empty() {
            "Mock answer".to_string()
        } else {
            let clipped: String = combined.chars().take(120).collect();
            format!("Mock answer referencing context: {clipped}")
        };
        RuntimeResult::Message {
            content,
            usage: Usage {
                prompt: 150,
                completion: 60,
            },
        }
    }

    fn decode(data: &Value) -> Result<RuntimeResult, ApiError> {
        let usage = Usage {
            prompt: data
                .pointer("/usage/prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            completion: data
                .pointer("/usage/completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        };

        let message = data
            .pointer("/choices/0/message")
            .ok_or_else(|| ApiError::Upstream("runtime response missing choices".to_string()))?;

        if let Some(tool_call) = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .and_then(|calls| calls.first())
        {
            let name = tool_call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let arguments = decode_arguments(tool_call.pointer("/function/arguments"));
            return Ok(RuntimeResult::ToolCall {
                name,
                arguments,
                usage,
            });
        }

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(RuntimeResult::Message { content, usage })
    }
}

/// Tool arguments may arrive as a JSON string or an object; malformed JSON
/// decodes to an empty map rather than failing the step
fn decode_arguments(raw: Option<&Value>) -> JsonMap {
    match raw {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => JsonMap::new(),
    }
}

#[async_trait]
impl LlmRuntime for RuntimeClient {
    async fn chat(&self, payload: &RuntimePayload) -> Result<RuntimeResult, ApiError> {
        if self.mock_mode {
            debug!("runtime_mock_response");
            return Ok(Self::mock_response(payload));
        }

        let url = self
            .resolve_url()
            .ok_or_else(|| ApiError::MissingConfig("LLM runtime URL not configured".to_string()))?;
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::MissingConfig("LLM runtime API key missing".to_string()))?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "llm_runtime_error");
                if e.is_timeout() {
                    ApiError::UpstreamTimeout(format!("llm runtime timeout: {e}"))
                } else {
                    ApiError::Upstream(format!("llm runtime error: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Upstream(format!("llm runtime body error: {e}")))?;

        if !status.is_success() {
            error!(status = %status, body = truncate(&body, 200), "llm_runtime_http_error");
            return Err(ApiError::Upstream(format!(
                "llm runtime error ({status}): {}",
                truncate(&body, 200)
            )));
        }

        let data: Value = serde_json::from_str(&body).map_err(|_| {
            ApiError::Upstream(format!(
                "llm runtime returned non-JSON response: {}",
                truncate(&body, 200)
            ))
        })?;
        Self::decode(&data)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while end < s.len() && !s.is_char_boundary(end) {
        end += 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(messages: Vec<ChatMessage>, context: Vec<Value>) -> RuntimePayload {
        RuntimePayload {
            model: "mock".to_string(),
            messages,
            tools: vec![],
            context,
            max_tokens: 512,
            temperature: 0.2,
        }
    }

    #[tokio::test]
    async fn mock_mode_returns_message_with_context() {
        let client = RuntimeClient::new(RuntimeConfig::default(), true);
        let result = client
            .chat(&payload(
                vec![ChatMessage::user("Tell me about LDAP")],
                vec![json!({"summary": "LDAP intro summary"})],
            ))
            .await
            .unwrap();
        match result {
            RuntimeResult::Message { content, usage } => {
                assert!(content.contains("LDAP intro summary"));
                assert_eq!(usage.prompt, 150);
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_mode_scripts_a_tool_call() {
        let client = RuntimeClient::new(RuntimeConfig::default(), true);
        let result = client
            .chat(&payload(vec![ChatMessage::user("please TOOL_CALL now")], vec![]))
            .await
            .unwrap();
        match result {
            RuntimeResult::ToolCall { name, arguments, .. } => {
                assert_eq!(name, "read_doc_section");
                assert_eq!(arguments["doc_id"], "doc_1");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_url_outside_mock_is_503() {
        let client = RuntimeClient::new(RuntimeConfig::default(), false);
        let err = client
            .chat(&payload(vec![ChatMessage::user("hi")], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingConfig(_)));
    }

    #[tokio::test]
    async fn missing_api_key_outside_mock_is_503() {
        let mut config = RuntimeConfig::default();
        config.base_url = Some("http://localhost:9/v1".to_string());
        let client = RuntimeClient::new(config, false);
        let err = client
            .chat(&payload(vec![ChatMessage::user("hi")], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingConfig(_)));
    }

    #[test]
    fn decode_prefers_first_tool_call() {
        let data = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"function": {"name": "read_chunk_window", "arguments": "{\"doc_id\": \"doc_1\"}"}},
                        {"function": {"name": "read_doc_section", "arguments": {}}}
                    ]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        });
        match RuntimeClient::decode(&data).unwrap() {
            RuntimeResult::ToolCall { name, arguments, usage } => {
                assert_eq!(name, "read_chunk_window");
                assert_eq!(arguments["doc_id"], "doc_1");
                assert_eq!(usage.total(), 15);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn decode_message_when_no_tool_calls() {
        let data = json!({
            "choices": [{"message": {"content": "final answer"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4}
        });
        match RuntimeClient::decode(&data).unwrap() {
            RuntimeResult::Message { content, .. } => assert_eq!(content, "final answer"),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn malformed_arguments_default_to_empty_map() {
        assert!(decode_arguments(Some(&json!("not json"))).is_empty());
        assert!(decode_arguments(Some(&json!(42))).is_empty());
        assert!(decode_arguments(None).is_empty());
        let map = decode_arguments(Some(&json!({"radius": 2})));
        assert_eq!(map["radius"], 2);
    }

    #[test]
    fn url_resolution_appends_completions_to_v1_bases() {
        let mut config = RuntimeConfig::default();
        config.base_url = Some("http://runtime/api/v1/".to_string());
        let client = RuntimeClient::new(config, false);
        assert_eq!(
            client.resolve_url().unwrap(),
            "http://runtime/api/v1/chat/completions"
        );

        let mut config = RuntimeConfig::default();
        config.base_url = Some("http://runtime/custom/chat".to_string());
        let client = RuntimeClient::new(config, false);
        assert_eq!(client.resolve_url().unwrap(), "http://runtime/custom/chat");
    }
}
