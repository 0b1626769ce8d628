pub mod settings;

use std::sync::Arc;

use parking_lot::RwLock;

pub use settings::{
    EmbeddingConfig, GatewayConfig, OrchestratorConfig, ProxyConfig, RetrievalConfig,
    RuntimeConfig, SafetyConfig, ServerConfig, Settings,
};

/// Process-wide settings handle. Reads clone an immutable snapshot; admin
/// mutations publish a whole new snapshot atomically, so a request in
/// flight keeps the configuration it started with.
pub struct SettingsHandle {
    inner: RwLock<Arc<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(Arc::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        self.inner.read().clone()
    }

    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = self.inner.write();
        let mut next = (**guard).clone();
        mutate(&mut next);
        next.normalize();
        *guard = Arc::new(next);
    }
}
