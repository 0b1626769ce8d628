use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::models::{ChatMessage, RetrievalHit};

/// Per-item character cap inside the serialized context
const ITEM_CHAR_CAP: usize = 800;

/// Lightweight context entry: summaries and metadata only, never raw
/// chunk text
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub doc_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
    pub score: f32,
    pub summary: String,
}

/// Trimmed context plus the hits that made it in (those become the
/// response sources)
pub struct BuiltContext {
    pub items: Vec<ContextItem>,
    pub sources: Vec<RetrievalHit>,
    pub section_chunk_map: HashMap<String, String>,
}

pub fn build_context(hits: &[RetrievalHit], prompt_token_budget: usize) -> BuiltContext {
    // Prefer section-bearing hits; fall back to the raw hit list
    let section_hits: Vec<&RetrievalHit> = hits.iter().filter(|h| h.section_id.is_some()).collect();
    let candidates: Vec<&RetrievalHit> = if section_hits.is_empty() {
        hits.iter().collect()
    } else {
        section_hits
    };

    let budget_chars = prompt_token_budget.saturating_mul(4);
    let mut accumulated = 0usize;
    let mut items = Vec::new();
    let mut sources = Vec::new();
    let mut section_chunk_map = HashMap::new();

    for hit in candidates {
        let raw = hit
            .summary
            .as_deref()
            .or(hit.title.as_deref())
            .unwrap_or_default();
        let remaining = budget_chars.saturating_sub(accumulated);
        let take = raw.chars().count().min(remaining).min(ITEM_CHAR_CAP);
        let summary: String = raw.chars().take(take).collect();
        accumulated += summary.chars().count();

        if let (Some(section_id), Some(anchor)) = (hit.section_id.as_deref(), hit.anchor()) {
            section_chunk_map
                .entry(section_id.to_string())
                .or_insert_with(|| anchor.to_string());
        }

        items.push(ContextItem {
            doc_id: hit.doc_id.clone(),
            section_id: hit.section_id.clone(),
            title: hit.title.clone(),
            page_start: hit.page_start,
            page_end: hit.page_end,
            score: hit.score,
            summary,
        });
        sources.push(hit.clone());

        if accumulated >= budget_chars {
            break;
        }
    }

    BuiltContext {
        items,
        sources,
        section_chunk_map,
    }
}

const ROLE_PROMPT: &str = "You are the documentation assistant. Reason step by step but keep your \
     chain-of-thought hidden; share only the final answer. Ground replies in \
     the provided context and cite sources as [doc_id/section_id].";

const TOOL_POLICY_PROMPT: &str = "Tool policy: the context below carries summaries only. Start with the \
     smallest fetch that can answer the question and expand only if the \
     summaries are insufficient. Never repeat a read_chunk_window request \
     with the same (doc_id, section_id, anchor_chunk_id, window_before, \
     window_after); if nothing new is needed, answer from what you have.";

/// The four prompt messages: role, developer tool policy, serialized
/// context, user query
pub fn compose_messages(query: &str, items: &[ContextItem]) -> Vec<ChatMessage> {
    let context_lines: Vec<String> = items
        .iter()
        .map(|item| {
            serde_json::to_string(item).unwrap_or_else(|_| format!("{{\"doc_id\":\"{}\"}}", item.doc_id))
        })
        .collect();
    let context_block = format!(
        "Retrieved sections (summaries and metadata only):\n{}",
        context_lines.join("\n")
    );

    vec![
        ChatMessage::system(ROLE_PROMPT),
        ChatMessage::system(TOOL_POLICY_PROMPT),
        ChatMessage::system(context_block),
        ChatMessage::user(query),
    ]
}

/// Function-call schemas advertised to the runtime; window bounds carry the
/// configured radius cap
pub fn tool_schemas(max_radius: u32) -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "read_doc_section",
                "description": "Read the full text of one document section",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "doc_id": {"type": "string"},
                        "section_id": {"type": "string"}
                    },
                    "required": ["doc_id", "section_id"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "read_chunk_window",
                "description": "Read a contiguous window of chunks around a section's anchor chunk",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "doc_id": {"type": "string"},
                        "section_id": {"type": "string"},
                        "anchor_chunk_id": {"type": "string"},
                        "window_before": {"type": "integer", "minimum": 0, "maximum": max_radius},
                        "window_after": {"type": "integer", "minimum": 0, "maximum": max_radius},
                        "radius": {"type": "integer", "minimum": 0, "maximum": max_radius}
                    },
                    "required": ["doc_id"]
                }
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(section_id: &str, summary: &str) -> RetrievalHit {
        RetrievalHit {
            doc_id: "doc_1".to_string(),
            section_id: Some(section_id.to_string()),
            summary: Some(summary.to_string()),
            chunk_ids: Some(vec![format!("{section_id}_c0"), format!("{section_id}_c1")]),
            score: 0.9,
            ..Default::default()
        }
    }

    #[test]
    fn section_hits_preferred_over_raw() {
        let hits = vec![
            RetrievalHit {
                doc_id: "doc_plain".to_string(),
                score: 0.99,
                ..Default::default()
            },
            hit("sec_a", "summary a"),
        ];
        let built = build_context(&hits, 1024);
        assert_eq!(built.items.len(), 1);
        assert_eq!(built.items[0].section_id.as_deref(), Some("sec_a"));
    }

    #[test]
    fn falls_back_to_raw_hits_without_sections() {
        let hits = vec![RetrievalHit {
            doc_id: "doc_plain".to_string(),
            title: Some("Plain doc".to_string()),
            score: 0.5,
            ..Default::default()
        }];
        let built = build_context(&hits, 1024);
        assert_eq!(built.items.len(), 1);
        assert_eq!(built.items[0].summary, "Plain doc");
    }

    #[test]
    fn per_item_cap_is_800_chars() {
        let hits = vec![hit("sec_a", &"x".repeat(5000))];
        let built = build_context(&hits, 10_000);
        assert_eq!(built.items[0].summary.chars().count(), 800);
    }

    #[test]
    fn overall_budget_stops_the_context() {
        let hits = vec![
            hit("sec_a", &"a".repeat(800)),
            hit("sec_b", &"b".repeat(800)),
            hit("sec_c", &"c".repeat(800)),
        ];
        // 300 tokens ~ 1200 chars: first item takes 800, second gets 400,
        // third never enters
        let built = build_context(&hits, 300);
        assert_eq!(built.items.len(), 2);
        assert_eq!(built.items[1].summary.chars().count(), 400);
    }

    #[test]
    fn anchor_map_uses_first_chunk() {
        let built = build_context(&[hit("sec_a", "s")], 1024);
        assert_eq!(
            built.section_chunk_map.get("sec_a").map(String::as_str),
            Some("sec_a_c0")
        );
    }

    #[test]
    fn messages_have_roles_in_contract_order() {
        let built = build_context(&[hit("sec_a", "summary a")], 1024);
        let messages = compose_messages("what is a?", &built.items);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "system");
        assert_eq!(messages[2].role, "system");
        assert_eq!(messages[3].role, "user");
        assert!(messages[2].content.contains("Retrieved sections"));
        assert!(messages[2].content.contains("summary a"));
        assert!(messages[3].content.contains("what is a?"));
    }

    #[test]
    fn schemas_advertise_radius_maximum() {
        let schemas = tool_schemas(4);
        let window = schemas
            .iter()
            .find(|s| s["function"]["name"] == "read_chunk_window")
            .unwrap();
        let props = &window["function"]["parameters"]["properties"];
        assert_eq!(props["window_before"]["maximum"], 4);
        assert_eq!(props["window_after"]["maximum"], 4);
        assert_eq!(props["radius"]["maximum"], 4);
    }
}
