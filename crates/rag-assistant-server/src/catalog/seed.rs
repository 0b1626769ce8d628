use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::models::catalog::{ChunkRecord, DocumentMetadata, DocumentStatus, SectionInfo};
use crate::models::JsonMap;
use crate::services::vector_index::{pseudo_embedding, Collection, IndexRecord, VectorIndexGateway};

use super::store::DocumentStore;

/// Demo corpus used by mock mode and the test suite: one indexed document
/// for `tenant_1` with three sections and an ordered chunk ladder.
pub fn seed_store() -> DocumentStore {
    let store = DocumentStore::new();
    let (metadata, sections, chunks) = demo_document();
    store.insert_document(metadata, sections, chunks);
    store
}

pub fn demo_document() -> (DocumentMetadata, Vec<SectionInfo>, Vec<ChunkRecord>) {
    let now = Utc::now();
    let metadata = DocumentMetadata {
        doc_id: "doc_1".to_string(),
        tenant_id: "tenant_1".to_string(),
        title: "Orion LDAP Guide".to_string(),
        product: Some("orion".to_string()),
        version: Some("2.4".to_string()),
        tags: vec!["orion".to_string(), "ldap".to_string()],
        pages: Some(8),
        storage_uri: None,
        status: DocumentStatus::Indexed,
        created_at: now,
        updated_at: now,
    };

    let sections = vec![
        SectionInfo {
            doc_id: "doc_1".to_string(),
            section_id: "sec_intro".to_string(),
            title: "Introduction".to_string(),
            page_start: 1,
            page_end: 2,
            summary: "Introduces LDAP integration in Orion and the directory concepts it builds on.".to_string(),
            chunk_ids: vec!["chunk_1".to_string(), "chunk_2".to_string()],
            anchor_chunk_id: None,
        },
        SectionInfo {
            doc_id: "doc_1".to_string(),
            section_id: "sec_setup".to_string(),
            title: "Setup".to_string(),
            page_start: 3,
            page_end: 5,
            summary: "Step-by-step LDAP connector setup: bind accounts, base DN, sync schedules.".to_string(),
            chunk_ids: vec!["chunk_3".to_string(), "chunk_4".to_string(), "chunk_5".to_string()],
            anchor_chunk_id: None,
        },
        SectionInfo {
            doc_id: "doc_1".to_string(),
            section_id: "sec_troubleshooting".to_string(),
            title: "Troubleshooting".to_string(),
            page_start: 6,
            page_end: 8,
            summary: "Common sync failures, referral loops and certificate problems.".to_string(),
            chunk_ids: vec!["chunk_6".to_string(), "chunk_7".to_string()],
            anchor_chunk_id: None,
        },
    ];

    let chunks = vec![
        chunk("chunk_1", "sec_intro", 1, 0, "Orion ships an LDAP integration layer that maps directory entries onto workspace accounts."),
        chunk("chunk_2", "sec_intro", 2, 1, "The integration supports OpenLDAP and Active Directory; groups become Orion roles."),
        chunk("chunk_3", "sec_setup", 3, 2, "Create a read-only bind account and record the base DN before enabling the connector."),
        chunk("chunk_4", "sec_setup", 4, 3, "Configure the sync schedule; incremental sync runs every 15 minutes by default."),
        chunk("chunk_5", "sec_setup", 5, 4, "Attribute mapping is declared per tenant; unmapped attributes are ignored."),
        chunk("chunk_6", "sec_troubleshooting", 6, 5, "A stalled sync usually means the bind credential expired or the referral chased a dead server."),
        chunk("chunk_7", "sec_troubleshooting", 7, 6, "Certificate validation errors: import the directory CA into the Orion trust store."),
    ];

    (metadata, sections, chunks)
}

fn chunk(id: &str, section_id: &str, page: u32, index: u32, text: &str) -> ChunkRecord {
    ChunkRecord {
        chunk_id: id.to_string(),
        doc_id: "doc_1".to_string(),
        section_id: section_id.to_string(),
        page,
        chunk_index: index,
        text: text.to_string(),
    }
}

/// Populate both the catalog store and the three vector collections
pub async fn seed_demo_data(store: &DocumentStore, gateway: &VectorIndexGateway, dim: usize) -> Result<()> {
    let (metadata, sections, chunks) = demo_document();

    let doc_record = IndexRecord {
        id: metadata.doc_id.clone(),
        embedding: pseudo_embedding(&format!("{} {}", metadata.title, "ldap directory guide"), dim),
        metadata: doc_meta(&metadata),
    };
    gateway.upsert(Collection::Docs, vec![doc_record]).await?;

    let section_records = sections
        .iter()
        .map(|s| IndexRecord {
            id: format!("{}:{}", s.doc_id, s.section_id),
            embedding: pseudo_embedding(&format!("{} {}", s.title, s.summary), dim),
            metadata: section_meta(s),
        })
        .collect();
    gateway.upsert(Collection::Sections, section_records).await?;

    let chunk_records = chunks
        .iter()
        .map(|c| IndexRecord {
            id: format!("{}:{}", c.doc_id, c.chunk_id),
            embedding: pseudo_embedding(&c.text, dim),
            metadata: chunk_meta(c),
        })
        .collect();
    gateway.upsert(Collection::Chunks, chunk_records).await?;

    store.insert_document(metadata, sections, chunks);
    info!(docs = store.doc_count(), "demo_data_seeded");
    Ok(())
}

fn doc_meta(doc: &DocumentMetadata) -> JsonMap {
    let mut meta = JsonMap::new();
    meta.insert("tenant_id".into(), json!(doc.tenant_id));
    meta.insert("doc_id".into(), json!(doc.doc_id));
    meta.insert("title".into(), json!(doc.title));
    meta.insert("tags".into(), json!(doc.tags));
    if let Some(product) = &doc.product {
        meta.insert("product".into(), json!(product));
    }
    if let Some(version) = &doc.version {
        meta.insert("version".into(), json!(version));
    }
    meta
}

fn section_meta(section: &SectionInfo) -> JsonMap {
    let mut meta = JsonMap::new();
    meta.insert("tenant_id".into(), json!("tenant_1"));
    meta.insert("doc_id".into(), json!(section.doc_id));
    meta.insert("section_id".into(), json!(section.section_id));
    meta.insert("title".into(), json!(section.title));
    meta.insert("page_start".into(), json!(section.page_start));
    meta.insert("page_end".into(), json!(section.page_end));
    meta.insert("summary".into(), json!(section.summary));
    meta.insert("chunk_ids".into(), json!(section.chunk_ids));
    if let Some(anchor) = section.anchor_chunk_id() {
        meta.insert("anchor_chunk_id".into(), json!(anchor));
    }
    meta
}

fn chunk_meta(chunk: &ChunkRecord) -> JsonMap {
    let mut meta = JsonMap::new();
    meta.insert("tenant_id".into(), json!("tenant_1"));
    meta.insert("doc_id".into(), json!(chunk.doc_id));
    meta.insert("section_id".into(), json!(chunk.section_id));
    meta.insert("chunk_id".into(), json!(chunk.chunk_id));
    meta.insert("page".into(), json!(chunk.page));
    meta.insert("chunk_index".into(), json!(chunk.chunk_index));
    meta.insert("text".into(), json!(chunk.text));
    meta
}
