use serde::{Deserialize, Serialize};

use super::chat::UserContext;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Allowed,
    Transformed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub status: DecisionStatus,
    pub reason: String,
    pub message: String,
    pub risk_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformed_text: Option<String>,
    pub policy_id: String,
    pub trace_id: String,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Allowed => "allowed",
            DecisionStatus::Transformed => "transformed",
            DecisionStatus::Blocked => "blocked",
        }
    }
}

impl SafetyDecision {
    pub fn is_blocked(&self) -> bool {
        self.status == DecisionStatus::Blocked
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SafetyMeta {
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputCheckRequest {
    pub query: String,
    #[serde(default)]
    pub user: Option<UserContext>,
    #[serde(default)]
    pub meta: Option<SafetyMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputCheckRequest {
    #[serde(default)]
    pub query: String,
    pub answer: String,
    #[serde(default)]
    pub user: Option<UserContext>,
    #[serde(default)]
    pub meta: Option<SafetyMeta>,
}
