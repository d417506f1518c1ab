//! Persisted enable/disable decisions that outlive a single run.

use async_trait::async_trait;
use mcpbridge_core::BridgeResult;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Where the registry records whether a service should run.
///
/// A stored value overrides the configured `enabled` flag at registration.
#[async_trait]
pub trait RuntimeStateStore: Send + Sync {
    /// `None` when nothing was recorded for the service.
    async fn load_enabled(&self, service_id: &str) -> BridgeResult<Option<bool>>;

    async fn save_enabled(&self, service_id: &str, enabled: bool) -> BridgeResult<()>;

    async fn forget(&self, service_id: &str) -> BridgeResult<()>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryRuntimeState {
    enabled: RwLock<HashMap<String, bool>>,
}

impl MemoryRuntimeState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeStateStore for MemoryRuntimeState {
    async fn load_enabled(&self, service_id: &str) -> BridgeResult<Option<bool>> {
        Ok(self.enabled.read().get(service_id).copied())
    }

    async fn save_enabled(&self, service_id: &str, enabled: bool) -> BridgeResult<()> {
        self.enabled.write().insert(service_id.to_string(), enabled);
        Ok(())
    }

    async fn forget(&self, service_id: &str) -> BridgeResult<()> {
        self.enabled.write().remove(service_id);
        Ok(())
    }
}
