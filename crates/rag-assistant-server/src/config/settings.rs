use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Scripted runtime + pseudo-embeddings + seeded catalog/index
    pub mock_mode: bool,
    pub server: ServerConfig,
    pub retrieval: RetrievalConfig,
    pub orchestrator: OrchestratorConfig,
    pub safety: SafetyConfig,
    pub proxy: ProxyConfig,
    pub runtime: RuntimeConfig,
    pub embedding: EmbeddingConfig,
    pub gateway: GatewayConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mock_mode: true,
            server: ServerConfig::default(),
            retrieval: RetrievalConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            safety: SafetyConfig::default(),
            proxy: ProxyConfig::default(),
            runtime: RuntimeConfig::default(),
            embedding: EmbeddingConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8070,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub docs_top_k: usize,
    pub sections_top_k_per_doc: usize,
    pub max_total_sections: usize,
    pub chunk_top_k: usize,
    /// Per-document cap in the chunk stage; 0 disables the cap
    pub topk_per_doc: usize,
    pub min_docs: usize,
    pub enable_section_cosine: bool,
    pub enable_rerank: bool,
    pub rerank_score_threshold: f32,
    pub rerank_model: String,
    pub rerank_top_n: usize,
    pub rerank_api_base: Option<String>,
    pub rerank_api_key: Option<String>,
    pub chunks_enabled: bool,
    pub enable_filters: bool,
    pub max_results: usize,
    pub timeout_seconds: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            docs_top_k: 5,
            sections_top_k_per_doc: 10,
            max_total_sections: 10,
            chunk_top_k: 20,
            topk_per_doc: 0,
            min_docs: 5,
            enable_section_cosine: true,
            enable_rerank: false,
            rerank_score_threshold: 0.0,
            rerank_model: "gpt-4o-mini".to_string(),
            rerank_top_n: 5,
            rerank_api_base: None,
            rerank_api_key: None,
            chunks_enabled: true,
            enable_filters: false,
            max_results: 5,
            timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub default_model: String,
    pub prompt_token_budget: usize,
    pub context_token_budget: usize,
    pub max_tool_steps: usize,
    /// Per-side chunk-window radius cap for the progressive window
    pub window_radius: u32,
    pub default_user_id: String,
    pub default_tenant_id: String,
    // Legacy knobs, coerced into window_radius at load/update time
    #[serde(skip_serializing)]
    pub window_initial: Option<u32>,
    #[serde(skip_serializing)]
    pub window_step: Option<u32>,
    #[serde(skip_serializing)]
    pub window_max: Option<u32>,
    #[serde(skip_serializing)]
    pub max_chunk_window: Option<u32>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
            prompt_token_budget: 4096,
            context_token_budget: 4096,
            max_tool_steps: 4,
            window_radius: 5,
            default_user_id: "anonymous".to_string(),
            default_tenant_id: "observer_tenant".to_string(),
            window_initial: None,
            window_step: None,
            window_max: None,
            max_chunk_window: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SafetyConfig {
    /// strict / balanced / relaxed
    pub policy_mode: String,
    pub blocklist: Vec<String>,
    pub enable_pii_sanitize: bool,
    pub default_policy_id: String,
    pub safety_llm_enabled: bool,
    pub safety_llm_model: String,
    pub safety_llm_base_url: Option<String>,
    pub safety_llm_api_key: Option<String>,
    pub safety_llm_timeout_seconds: u64,
    pub safety_llm_fail_open: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            policy_mode: "balanced".to_string(),
            blocklist: vec!["hack".to_string(), "breach".to_string(), "exploit".to_string()],
            enable_pii_sanitize: true,
            default_policy_id: "policy_default_v1".to_string(),
            safety_llm_enabled: false,
            safety_llm_model: "openai/gpt-oss-safeguard-20b".to_string(),
            safety_llm_base_url: None,
            safety_llm_api_key: None,
            safety_llm_timeout_seconds: 15,
            safety_llm_fail_open: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Per-side cap enforced by read_chunk_window
    pub max_window_radius: u32,
    pub max_text_bytes: usize,
    pub max_pages_per_call: u32,
    pub rate_limit_calls: u32,
    pub rate_limit_tokens: u64,
    pub rate_limit_period_seconds: u64,
    // Legacy alias: total window size, coerced via R = (total - 1) / 2
    #[serde(skip_serializing)]
    pub max_chunk_window: Option<u32>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_window_radius: 5,
            max_text_bytes: 20_480,
            max_pages_per_call: 5,
            rate_limit_calls: 10,
            rate_limit_tokens: 2000,
            rate_limit_period_seconds: 60,
            max_chunk_window: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// None means no client-side timeout toward the upstream LLM
    pub timeout_seconds: Option<u64>,
    pub max_completion_tokens: usize,
    pub temperature: f32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_seconds: None,
            max_completion_tokens: 512,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            model: "baai/bge-m3".to_string(),
            dimension: 8,
            max_attempts: 2,
            retry_delay_ms: 1000,
            timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub rate_limit_requests: u32,
    pub rate_limit_period_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: 60,
            rate_limit_period_seconds: 60,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(Environment::with_prefix("APP").separator("__").try_parsing(true))
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.normalize();
        Ok(settings)
    }

    /// Coerce legacy window knobs into the unified radius parameters.
    /// Runs after file/env load and after every admin mutation.
    pub fn normalize(&mut self) {
        if let Some(total) = self.orchestrator.max_chunk_window.take() {
            self.orchestrator.window_radius = radius_from_total(total);
        }
        if let Some(max) = self.orchestrator.window_max.take() {
            self.orchestrator.window_radius = max;
        }
        // window_initial/window_step have no free parameter left: the loop
        // always starts at min(1, radius) and expands by 1
        self.orchestrator.window_initial = None;
        self.orchestrator.window_step = None;

        if let Some(total) = self.proxy.max_chunk_window.take() {
            self.proxy.max_window_radius = radius_from_total(total);
        }
    }

    /// Apply an orchestrator admin update; only the recognized knobs are
    /// consumed, everything else in the payload is ignored.
    pub fn apply_orchestrator_update(&mut self, payload: &serde_json::Map<String, Value>) {
        if let Some(v) = payload.get("default_model").and_then(Value::as_str) {
            self.orchestrator.default_model = v.to_string();
        }
        if let Some(v) = payload.get("prompt_token_budget").and_then(Value::as_u64) {
            self.orchestrator.prompt_token_budget = v as usize;
        }
        if let Some(v) = payload.get("context_token_budget").and_then(Value::as_u64) {
            self.orchestrator.context_token_budget = v as usize;
        }
        if let Some(v) = payload.get("max_tool_steps").and_then(Value::as_u64) {
            self.orchestrator.max_tool_steps = v as usize;
        }

        let mut radius = payload.get("window_radius").and_then(Value::as_u64);
        if radius.is_none() {
            radius = payload.get("window_max").and_then(Value::as_u64);
        }
        if radius.is_none() {
            radius = payload
                .get("max_chunk_window")
                .and_then(Value::as_u64)
                .map(|total| u64::from(radius_from_total(total as u32)));
        }
        if let Some(r) = radius {
            self.orchestrator.window_radius = r.min(u64::from(u32::MAX)) as u32;
        }
        self.normalize();
    }

    pub fn apply_retrieval_update(&mut self, payload: &serde_json::Map<String, Value>) {
        let r = &mut self.retrieval;
        if let Some(v) = payload.get("docs_top_k").and_then(Value::as_u64) {
            r.docs_top_k = v as usize;
        }
        if let Some(v) = payload.get("sections_top_k_per_doc").and_then(Value::as_u64) {
            r.sections_top_k_per_doc = v as usize;
        }
        if let Some(v) = payload.get("max_total_sections").and_then(Value::as_u64) {
            r.max_total_sections = v as usize;
        }
        if let Some(v) = payload.get("chunk_top_k").and_then(Value::as_u64) {
            r.chunk_top_k = v as usize;
        }
        if let Some(v) = payload.get("topk_per_doc").and_then(Value::as_u64) {
            r.topk_per_doc = v as usize;
        }
        if let Some(v) = payload.get("min_docs").and_then(Value::as_u64) {
            r.min_docs = v as usize;
        }
        if let Some(v) = payload.get("enable_section_cosine").and_then(Value::as_bool) {
            r.enable_section_cosine = v;
        }
        if let Some(v) = payload.get("enable_rerank").and_then(Value::as_bool) {
            r.enable_rerank = v;
        }
        if let Some(v) = payload.get("rerank_score_threshold").and_then(Value::as_f64) {
            r.rerank_score_threshold = v as f32;
        }
        if let Some(v) = payload.get("rerank_model").and_then(Value::as_str) {
            r.rerank_model = v.to_string();
        }
        if let Some(v) = payload.get("rerank_top_n").and_then(Value::as_u64) {
            r.rerank_top_n = v as usize;
        }
        if let Some(v) = payload.get("chunks_enabled").and_then(Value::as_bool) {
            r.chunks_enabled = v;
        }
        if let Some(v) = payload.get("enable_filters").and_then(Value::as_bool) {
            r.enable_filters = v;
        }
        if let Some(v) = payload.get("max_results").and_then(Value::as_u64) {
            r.max_results = v as usize;
        }
    }

    pub fn apply_proxy_update(&mut self, payload: &serde_json::Map<String, Value>) {
        let p = &mut self.proxy;
        let mut radius = payload.get("max_window_radius").and_then(Value::as_u64);
        if radius.is_none() {
            radius = payload
                .get("max_chunk_window")
                .and_then(Value::as_u64)
                .map(|total| u64::from(radius_from_total(total as u32)));
        }
        if let Some(r) = radius {
            p.max_window_radius = r.min(u64::from(u32::MAX)) as u32;
        }
        if let Some(v) = payload.get("max_text_bytes").and_then(Value::as_u64) {
            p.max_text_bytes = v as usize;
        }
        if let Some(v) = payload.get("max_pages_per_call").and_then(Value::as_u64) {
            p.max_pages_per_call = v as u32;
        }
        if let Some(v) = payload.get("rate_limit_calls").and_then(Value::as_u64) {
            p.rate_limit_calls = v as u32;
        }
        if let Some(v) = payload.get("rate_limit_tokens").and_then(Value::as_u64) {
            p.rate_limit_tokens = v;
        }
    }

    pub fn apply_safety_update(&mut self, payload: &serde_json::Map<String, Value>) {
        let s = &mut self.safety;
        if let Some(v) = payload.get("policy_mode").and_then(Value::as_str) {
            s.policy_mode = v.to_string();
        }
        if let Some(v) = payload.get("blocklist").and_then(Value::as_array) {
            s.blocklist = v
                .iter()
                .filter_map(Value::as_str)
                .map(|k| k.to_string())
                .collect();
        }
        if let Some(v) = payload.get("enable_pii_sanitize").and_then(Value::as_bool) {
            s.enable_pii_sanitize = v;
        }
        if let Some(v) = payload.get("safety_llm_enabled").and_then(Value::as_bool) {
            s.safety_llm_enabled = v;
        }
        if let Some(v) = payload.get("safety_llm_model").and_then(Value::as_str) {
            s.safety_llm_model = v.to_string();
        }
    }
}

/// A window of `total` chunks spans the anchor plus R per side
fn radius_from_total(total: u32) -> u32 {
    total.saturating_sub(1) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_total_window_is_coerced_to_radius() {
        assert_eq!(radius_from_total(5), 2);
        assert_eq!(radius_from_total(1), 0);
        assert_eq!(radius_from_total(0), 0);

        let mut settings = Settings::default();
        settings.orchestrator.max_chunk_window = Some(7);
        settings.normalize();
        assert_eq!(settings.orchestrator.window_radius, 3);
    }

    #[test]
    fn legacy_window_max_wins_over_total() {
        let mut settings = Settings::default();
        settings.orchestrator.max_chunk_window = Some(7);
        settings.orchestrator.window_max = Some(2);
        settings.normalize();
        assert_eq!(settings.orchestrator.window_radius, 2);
    }

    #[test]
    fn orchestrator_update_recognizes_aliases() {
        let mut settings = Settings::default();
        let payload: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"max_chunk_window": 9, "max_tool_steps": 2}"#).unwrap();
        settings.apply_orchestrator_update(&payload);
        assert_eq!(settings.orchestrator.window_radius, 4);
        assert_eq!(settings.orchestrator.max_tool_steps, 2);
    }

    #[test]
    fn retrieval_update_ignores_unknown_keys() {
        let mut settings = Settings::default();
        let payload: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"docs_top_k": 7, "bogus": true}"#).unwrap();
        settings.apply_retrieval_update(&payload);
        assert_eq!(settings.retrieval.docs_top_k, 7);
    }

    #[test]
    fn proxy_alias_coercion() {
        let mut settings = Settings::default();
        let payload: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"max_chunk_window": 5}"#).unwrap();
        settings.apply_proxy_update(&payload);
        assert_eq!(settings.proxy.max_window_radius, 2);
    }
}
