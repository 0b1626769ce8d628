use std::sync::Arc;

use crate::config::SettingsHandle;
use crate::services::{Orchestrator, Retriever, SafetyFilter};
use crate::tools::rate_limit::ToolRateLimiter;
use crate::tools::ToolRegistry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsHandle>,
    pub safety: Arc<SafetyFilter>,
    pub retriever: Arc<Retriever>,
    pub orchestrator: Arc<Orchestrator>,
    pub tools: Arc<ToolRegistry>,
    /// Per (tenant, user) request buckets on the public surface
    pub gateway_limiter: Arc<ToolRateLimiter>,
}
