use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;
use crate::models::JsonMap;
use crate::utils::cosine_score;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Docs,
    Sections,
    Chunks,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Docs => "docs",
            Collection::Sections => "sections",
            Collection::Chunks => "chunks",
        }
    }
}

/// Typed metadata predicate, converted to the engine's filter dialect at
/// the boundary. The in-memory engine evaluates it directly.
#[derive(Debug, Clone)]
pub enum Predicate {
    True,
    Eq(String, String),
    In(String, Vec<String>),
    /// Any stored tag equals any requested tag, case-insensitive
    TagsAnyOf(Vec<String>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::True => other,
            Predicate::And(mut items) => {
                items.push(other);
                Predicate::And(items)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn matches(&self, meta: &JsonMap) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Eq(field, value) => meta
                .get(field)
                .map(|v| value_as_string(v) == *value)
                .unwrap_or(false),
            Predicate::In(field, values) => meta
                .get(field)
                .map(|v| {
                    let s = value_as_string(v);
                    values.iter().any(|candidate| *candidate == s)
                })
                .unwrap_or(false),
            Predicate::TagsAnyOf(requested) => {
                let stored = meta
                    .get("tags")
                    .map(stored_tags)
                    .unwrap_or_default();
                requested.iter().any(|req| {
                    let req = req.to_lowercase();
                    stored.iter().any(|tag| tag.to_lowercase() == req)
                })
            }
            Predicate::And(items) => items.iter().all(|p| p.matches(meta)),
            Predicate::Or(items) => items.iter().any(|p| p.matches(meta)),
        }
    }

    /// Engine filter dialect (`$and` / `$or` / `$in`), used when talking to
    /// an external vector store and in request logging.
    pub fn to_filter_json(&self) -> Value {
        match self {
            Predicate::True => json!({}),
            Predicate::Eq(field, value) => json!({ field: value }),
            Predicate::In(field, values) => json!({ field: { "$in": values } }),
            Predicate::TagsAnyOf(values) => json!({ "tags": { "$any": values } }),
            Predicate::And(items) => {
                json!({ "$and": items.iter().map(|p| p.to_filter_json()).collect::<Vec<_>>() })
            }
            Predicate::Or(items) => {
                json!({ "$or": items.iter().map(|p| p.to_filter_json()).collect::<Vec<_>>() })
            }
        }
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tags are stored either as an array or a comma-joined string (the engine
/// flattens lists)
fn stored_tags(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(value_as_string).collect(),
        Value::String(s) => s.split(',').map(|t| t.trim().to_string()).collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: JsonMap,
}

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: IndexRecord,
    pub score: f32,
}

/// Metadata-filtered ANN interface over the three logical collections
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        collection: Collection,
        embedding: &[f32],
        filter: &Predicate,
        n: usize,
    ) -> Result<Vec<ScoredRecord>>;

    async fn get(
        &self,
        collection: Collection,
        filter: &Predicate,
        limit: usize,
    ) -> Result<Vec<IndexRecord>>;

    async fn upsert(&self, collection: Collection, records: Vec<IndexRecord>) -> Result<()>;
}

/// In-memory engine with cosine scoring. The trait is the seam for a real
/// vector store; ordering is deterministic (score desc, then id).
#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<Collection, Vec<IndexRecord>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(
        &self,
        collection: Collection,
        embedding: &[f32],
        filter: &Predicate,
        n: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let collections = self.collections.read();
        let records = collections.get(&collection).cloned().unwrap_or_default();
        drop(collections);

        let mut scored: Vec<ScoredRecord> = records
            .into_iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|record| {
                let score = cosine_score(embedding, &record.embedding);
                ScoredRecord { record, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        scored.truncate(n);
        Ok(scored)
    }

    async fn get(
        &self,
        collection: Collection,
        filter: &Predicate,
        limit: usize,
    ) -> Result<Vec<IndexRecord>> {
        let collections = self.collections.read();
        let records = collections.get(&collection).cloned().unwrap_or_default();
        drop(collections);

        let mut matched: Vec<IndexRecord> = records
            .into_iter()
            .filter(|r| filter.matches(&r.metadata))
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn upsert(&self, collection: Collection, records: Vec<IndexRecord>) -> Result<()> {
        let mut collections = self.collections.write();
        let entry = collections.entry(collection).or_default();
        for record in records {
            if let Some(existing) = entry.iter_mut().find(|r| r.id == record.id) {
                *existing = record;
            } else {
                entry.push(record);
            }
        }
        Ok(())
    }
}

// ===== Embedding client =====

#[derive(Debug, Serialize)]
struct EmbeddingApiRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingApiItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiItem {
    embedding: Vec<f32>,
}

/// Embedding client with a retry contract: `max_attempts` tries with fixed
/// backoff, then a deterministic pseudo-embedding fallback so retrieval
/// degrades gracefully instead of failing the request.
pub struct EmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
    mock_mode: bool,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig, mock_mode: bool) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            config,
            mock_mode,
        }
    }

    /// Never fails; falls back to pseudo-embeddings on exhaustion
    pub async fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }
        if self.mock_mode || self.config.api_base.is_none() {
            debug!(items = texts.len(), "embedding_mock");
            return texts.iter().map(|t| self.pseudo_embedding(t)).collect();
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error: Option<String> = None;
        for attempt in 1..=max_attempts {
            let started = Instant::now();
            match self.request_embeddings(texts).await {
                Ok(embeddings) => {
                    debug!(
                        items = texts.len(),
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "embedding_response"
                    );
                    return embeddings;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "embedding_attempt_failed");
                    last_error = Some(e.to_string());
                    if attempt < max_attempts {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                }
            }
        }

        info!(
            reason = last_error.as_deref().unwrap_or("unknown"),
            "embedding_fallback_pseudo"
        );
        texts.iter().map(|t| self.pseudo_embedding(t)).collect()
    }

    pub async fn embed_one(&self, text: &str) -> Vec<f32> {
        self.embed(std::slice::from_ref(&text.to_string()))
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| self.pseudo_embedding(text))
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let base = self
            .config
            .api_base
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        let url = if base.ends_with("/v1") {
            format!("{base}/embeddings")
        } else {
            format!("{base}/v1/embeddings")
        };

        let payload = EmbeddingApiRequest {
            model: &self.config.model,
            input: texts,
            encoding_format: "float",
        };

        let mut request = self.client.post(&url).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("embedding API error ({status}): {body}");
        }

        let parsed: EmbeddingApiResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            anyhow::bail!(
                "embedding count mismatch: expected {}, got {}",
                texts.len(),
                parsed.data.len()
            );
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    /// SHA-256 of the text mapped into a small vector; stable across runs
    pub fn pseudo_embedding(&self, text: &str) -> Vec<f32> {
        pseudo_embedding(text, self.config.dimension)
    }
}

pub fn pseudo_embedding(text: &str, dim: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let bytes = digest.as_slice();
    (0..dim)
        .map(|i| {
            let start = (i * 4) % (bytes.len() - 3);
            let word = u32::from_be_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ]);
            (word % 1000) as f32 / 1000.0
        })
        .collect()
}

// ===== Tenant-scoped gateway =====

/// Wraps the vector index and inserts the tenant conjunct into every
/// filter. Callers never build the tenant predicate themselves.
pub struct VectorIndexGateway {
    index: Arc<dyn VectorIndex>,
    pub embedding: Arc<EmbeddingClient>,
}

impl VectorIndexGateway {
    pub fn new(index: Arc<dyn VectorIndex>, embedding: Arc<EmbeddingClient>) -> Self {
        Self { index, embedding }
    }

    fn scoped(tenant_id: &str, filter: Predicate) -> Predicate {
        Predicate::eq("tenant_id", tenant_id).and(filter)
    }

    pub async fn query(
        &self,
        collection: Collection,
        tenant_id: &str,
        embedding: &[f32],
        filter: Predicate,
        n: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let scoped = Self::scoped(tenant_id, filter);
        debug!(
            collection = collection.name(),
            filter = %scoped.to_filter_json(),
            n,
            "vector_query"
        );
        self.index.query(collection, embedding, &scoped, n).await
    }

    pub async fn get(
        &self,
        collection: Collection,
        tenant_id: &str,
        filter: Predicate,
        limit: usize,
    ) -> Result<Vec<IndexRecord>> {
        let scoped = Self::scoped(tenant_id, filter);
        self.index.get(collection, &scoped, limit).await
    }

    pub async fn upsert(&self, collection: Collection, records: Vec<IndexRecord>) -> Result<()> {
        self.index.upsert(collection, records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, Value)]) -> JsonMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn predicate_eq_and_in() {
        let m = meta(&[("tenant_id", json!("tenant_1")), ("doc_id", json!("doc_1"))]);
        assert!(Predicate::eq("tenant_id", "tenant_1").matches(&m));
        assert!(!Predicate::eq("tenant_id", "tenant_2").matches(&m));
        assert!(Predicate::In("doc_id".into(), vec!["doc_1".into(), "doc_2".into()]).matches(&m));
        assert!(!Predicate::In("doc_id".into(), vec!["doc_9".into()]).matches(&m));
    }

    #[test]
    fn tags_match_case_insensitive() {
        let array = meta(&[("tags", json!(["Orion", "LDAP"]))]);
        let joined = meta(&[("tags", json!("orion, ldap"))]);
        let p = Predicate::TagsAnyOf(vec!["ldap".into()]);
        assert!(p.matches(&array));
        assert!(p.matches(&joined));
        assert!(!Predicate::TagsAnyOf(vec!["kerberos".into()]).matches(&array));
    }

    #[test]
    fn and_chain_flattens() {
        let p = Predicate::eq("a", "1")
            .and(Predicate::eq("b", "2"))
            .and(Predicate::eq("c", "3"));
        let m = meta(&[("a", json!("1")), ("b", json!("2")), ("c", json!("3"))]);
        assert!(p.matches(&m));
        match p {
            Predicate::And(items) => assert_eq!(items.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn filter_dialect_shape() {
        let p = Predicate::eq("tenant_id", "t").and(Predicate::In(
            "doc_id".into(),
            vec!["doc_1".into()],
        ));
        let rendered = p.to_filter_json();
        assert!(rendered.get("$and").is_some());
    }

    #[test]
    fn pseudo_embedding_is_deterministic() {
        let a = pseudo_embedding("hello", 8);
        let b = pseudo_embedding("hello", 8);
        let c = pseudo_embedding("world", 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
        assert!(a.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[tokio::test]
    async fn mock_embed_never_fails() {
        let client = EmbeddingClient::new(EmbeddingConfig::default(), true);
        let out = client.embed(&["a".to_string(), "b".to_string()]).await;
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn gateway_always_scopes_tenant() {
        let index = Arc::new(InMemoryVectorIndex::new());
        index
            .upsert(
                Collection::Docs,
                vec![
                    IndexRecord {
                        id: "doc_1".into(),
                        embedding: pseudo_embedding("doc one", 8),
                        metadata: meta(&[("tenant_id", json!("tenant_1")), ("doc_id", json!("doc_1"))]),
                    },
                    IndexRecord {
                        id: "doc_2".into(),
                        embedding: pseudo_embedding("doc two", 8),
                        metadata: meta(&[("tenant_id", json!("tenant_2")), ("doc_id", json!("doc_2"))]),
                    },
                ],
            )
            .await
            .unwrap();

        let gateway = VectorIndexGateway::new(
            index,
            Arc::new(EmbeddingClient::new(EmbeddingConfig::default(), true)),
        );
        let query_emb = pseudo_embedding("doc", 8);
        let hits = gateway
            .query(Collection::Docs, "tenant_1", &query_emb, Predicate::True, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "doc_1");
    }
}
