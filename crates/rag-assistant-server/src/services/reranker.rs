use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::models::RetrievalHit;

/// Secondary ranker producing scores in [0,1], used to reorder and prune
/// section hits. Keyed by `doc_id::section_id`.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn available(&self) -> bool;
    async fn rerank(&self, query: &str, sections: &[RetrievalHit]) -> Result<HashMap<String, f32>>;
}

pub fn rerank_key(doc_id: &str, section_id: &str) -> String {
    format!("{doc_id}::{section_id}")
}

/// Chat-completions backed reranker with a JSON-only scoring prompt
pub struct LlmReranker {
    client: Client,
    api_base: Option<String>,
    api_key: Option<String>,
    model: String,
}

impl LlmReranker {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: config.rerank_api_base.clone(),
            api_key: config.rerank_api_key.clone(),
            model: config.rerank_model.clone(),
        }
    }

    fn build_prompt(query: &str, sections: &[RetrievalHit]) -> String {
        let mut prompt = String::from(
            "Given a user query and a list of sections, return a JSON array of objects \
             with fields \"doc_id\", \"section_id\" and \"rerank_score\" in [0,1], higher is \
             more relevant. Return ONLY JSON, no commentary.\n\n",
        );
        let _ = write!(prompt, "Query: {query}\n\nSections:\n");
        for hit in sections {
            let section_id = hit.section_id.as_deref().unwrap_or("-");
            let text = hit.summary.as_deref().or(hit.title.as_deref()).unwrap_or("");
            let clipped: String = text.chars().take(500).collect();
            let _ = writeln!(prompt, "- doc: {}, id: {}, text: {}", hit.doc_id, section_id, clipped);
        }
        prompt
    }

    fn parse_scores(raw: &str) -> HashMap<String, f32> {
        let mut scores = HashMap::new();
        let parsed: Option<Value> = serde_json::from_str(raw)
            .ok()
            .or_else(|| extract_first_json_array(raw).and_then(|s| serde_json::from_str(s).ok()));
        let Some(Value::Array(items)) = parsed else {
            return scores;
        };
        for item in items {
            let Some(section_id) = item.get("section_id").and_then(Value::as_str) else {
                continue;
            };
            let score = item
                .get("rerank_score")
                .or_else(|| item.get("score"))
                .and_then(Value::as_f64);
            let Some(score) = score else { continue };
            let key = match item.get("doc_id").and_then(Value::as_str) {
                Some(doc_id) => rerank_key(doc_id, section_id),
                None => section_id.to_string(),
            };
            scores.insert(key, (score as f32).clamp(0.0, 1.0));
        }
        scores
    }
}

#[async_trait]
impl Reranker for LlmReranker {
    fn available(&self) -> bool {
        self.api_base.is_some() && self.api_key.is_some()
    }

    async fn rerank(&self, query: &str, sections: &[RetrievalHit]) -> Result<HashMap<String, f32>> {
        if sections.is_empty() || !self.available() {
            return Ok(HashMap::new());
        }

        let base = self
            .api_base
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        let url = format!("{base}/v1/chat/completions");
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a reranker. Return JSON only. No explanations."},
                {"role": "user", "content": Self::build_prompt(query, sections)},
            ],
        });

        let mut request = self.client.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, "rerank_http_error");
            anyhow::bail!("rerank API error: {status}");
        }

        let body: Value = response.json().await?;
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        debug!(raw = content, "rerank_raw_content");
        Ok(Self::parse_scores(content))
    }
}

/// First balanced JSON array in a noisy completion
fn extract_first_json_array(s: &str) -> Option<&str> {
    let mut start: Option<usize> = None;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        if start.is_none() {
            if ch == '[' {
                start = Some(i);
                depth = 1;
            }
            continue;
        }
        if in_string {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    let st = start?;
                    return Some(&s[st..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scores_accepts_both_score_fields() {
        let raw = r#"[
            {"doc_id": "doc_1", "section_id": "sec_a", "rerank_score": 0.9},
            {"doc_id": "doc_1", "section_id": "sec_b", "score": 0.4},
            {"section_id": "sec_c", "rerank_score": 1.7}
        ]"#;
        let scores = LlmReranker::parse_scores(raw);
        assert_eq!(scores.get("doc_1::sec_a"), Some(&0.9));
        assert_eq!(scores.get("doc_1::sec_b"), Some(&0.4));
        // out-of-range scores are clamped, keys without doc fall back to bare id
        assert_eq!(scores.get("sec_c"), Some(&1.0));
    }

    #[test]
    fn parse_scores_survives_noise() {
        let raw = "Here you go: [{\"doc_id\": \"d\", \"section_id\": \"s\", \"rerank_score\": 0.5}] done";
        let scores = LlmReranker::parse_scores(raw);
        assert_eq!(scores.get("d::s"), Some(&0.5));
        assert!(LlmReranker::parse_scores("not json at all").is_empty());
    }

    #[test]
    fn prompt_uses_summaries_not_chunks() {
        let hits = vec![RetrievalHit {
            doc_id: "doc_1".to_string(),
            section_id: Some("sec_intro".to_string()),
            summary: Some("LDAP overview".to_string()),
            ..Default::default()
        }];
        let prompt = LlmReranker::build_prompt("ldap", &hits);
        assert!(prompt.contains("doc: doc_1, id: sec_intro, text: LDAP overview"));
    }

    #[test]
    fn unconfigured_reranker_is_unavailable() {
        let reranker = LlmReranker::from_config(&RetrievalConfig::default());
        assert!(!reranker.available());
    }
}
