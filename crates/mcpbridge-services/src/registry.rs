use crate::adapter::{ServiceAdapter, ServiceInfo, ServiceStatus};
use crate::backends::{build_backend, ServiceBackend};
use crate::catalog::ModuleCatalog;
use crate::runtime_state::RuntimeStateStore;
use futures_util::future::join_all;
use mcpbridge_core::{BridgeError, BridgeResult, ServiceConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notification published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { id: String },
    Unregistered { id: String },
    Started { id: String },
    Stopped { id: String },
    Error { id: String, message: String },
}

impl RegistryEvent {
    pub fn service_id(&self) -> &str {
        match self {
            Self::Registered { id }
            | Self::Unregistered { id }
            | Self::Started { id }
            | Self::Stopped { id }
            | Self::Error { id, .. } => id,
        }
    }

    /// Whether the set of running services may have changed.
    pub fn affects_tools(&self) -> bool {
        matches!(
            self,
            Self::Started { .. } | Self::Stopped { .. } | Self::Unregistered { .. }
        )
    }
}

/// Service counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub running: usize,
    pub starting: usize,
    pub stopped: usize,
    pub error: usize,
}

/// Owns every configured service and coordinates their lifecycles.
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<String, Arc<ServiceAdapter>>>,
    catalog: ModuleCatalog,
    runtime_state: Option<Arc<dyn RuntimeStateStore>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ServiceRegistry {
    pub fn new(catalog: ModuleCatalog) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            services: RwLock::new(BTreeMap::new()),
            catalog,
            runtime_state: None,
            events,
        }
    }

    /// Persist enable/disable decisions through `store`.
    pub fn with_runtime_state(mut self, store: Arc<dyn RuntimeStateStore>) -> Self {
        self.runtime_state = Some(store);
        self
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Register a service, starting it when enabled.
    ///
    /// A failed auto-start leaves the service in `Error` but registration
    /// still succeeds.
    pub async fn register(&self, config: ServiceConfig) -> BridgeResult<()> {
        config.validate()?;
        let backend = build_backend(&config, &self.catalog);
        self.register_with_backend(config, backend).await
    }

    /// Register a service with a caller-supplied backend.
    pub async fn register_with_backend(
        &self,
        config: ServiceConfig,
        backend: Arc<dyn ServiceBackend>,
    ) -> BridgeResult<()> {
        let id = config.id.clone();
        let enabled = match self.stored_enabled(&id).await {
            Some(stored) => stored,
            None => config.enabled,
        };

        {
            let mut services = self.services.write().await;
            if services.contains_key(&id) {
                return Err(BridgeError::ServiceAlreadyRunning(id));
            }
            services.insert(id.clone(), Arc::new(ServiceAdapter::new(config, backend)));
        }
        info!(service = %id, enabled, "Service registered");
        self.emit(RegistryEvent::Registered { id: id.clone() });

        if enabled {
            if let Err(e) = self.start(&id).await {
                warn!(service = %id, error = %e, "Auto-start failed");
            }
        }
        Ok(())
    }

    async fn stored_enabled(&self, id: &str) -> Option<bool> {
        let store = self.runtime_state.as_ref()?;
        match store.load_enabled(id).await {
            Ok(value) => value,
            Err(e) => {
                warn!(service = %id, error = %e, "Failed to read runtime state");
                None
            }
        }
    }

    async fn persist_enabled(&self, id: &str, enabled: bool) {
        if let Some(store) = &self.runtime_state {
            if let Err(e) = store.save_enabled(id, enabled).await {
                warn!(service = %id, error = %e, "Failed to persist runtime state");
            }
        }
    }

    /// Stop (if needed) and remove a service.
    pub async fn unregister(&self, id: &str) -> BridgeResult<()> {
        let adapter = self.get(id).await?;
        if adapter.status() != ServiceStatus::Stopped {
            adapter.close().await?;
        }
        self.services.write().await.remove(id);
        if let Some(store) = &self.runtime_state {
            if let Err(e) = store.forget(id).await {
                warn!(service = %id, error = %e, "Failed to clear runtime state");
            }
        }
        info!(service = %id, "Service unregistered");
        self.emit(RegistryEvent::Unregistered { id: id.to_string() });
        Ok(())
    }

    pub async fn get(&self, id: &str) -> BridgeResult<Arc<ServiceAdapter>> {
        self.services
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::ServiceNotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.services.read().await.contains_key(id)
    }

    /// Snapshots of every service, ordered by id.
    pub async fn list(&self) -> Vec<ServiceInfo> {
        self.adapters().await.iter().map(|a| a.info()).collect()
    }

    /// Running adapters, ordered by id.
    pub async fn running(&self) -> Vec<Arc<ServiceAdapter>> {
        self.adapters()
            .await
            .into_iter()
            .filter(|a| a.is_running())
            .collect()
    }

    async fn adapters(&self) -> Vec<Arc<ServiceAdapter>> {
        self.services.read().await.values().cloned().collect()
    }

    /// Start one service. Recovers from `Error` by closing first.
    pub async fn start(&self, id: &str) -> BridgeResult<()> {
        let adapter = self.get(id).await?;
        if adapter.status() == ServiceStatus::Error {
            adapter.close().await?;
        }

        match adapter.initialize().await {
            Ok(()) => {
                self.persist_enabled(id, true).await;
                self.emit(RegistryEvent::Started { id: id.to_string() });
                Ok(())
            }
            Err(e) => {
                if !matches!(e, BridgeError::ServiceAlreadyRunning(_)) {
                    error!(service = %id, error = %e, "Service failed to start");
                    self.emit(RegistryEvent::Error {
                        id: id.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    pub async fn stop(&self, id: &str) -> BridgeResult<()> {
        let adapter = self.get(id).await?;
        if let Err(e) = adapter.close().await {
            self.emit(RegistryEvent::Error {
                id: id.to_string(),
                message: e.to_string(),
            });
            return Err(BridgeError::ServiceStopFailed {
                id: id.to_string(),
                reason: e.to_string(),
            });
        }
        self.persist_enabled(id, false).await;
        self.emit(RegistryEvent::Stopped { id: id.to_string() });
        Ok(())
    }

    pub async fn restart(&self, id: &str) -> BridgeResult<()> {
        self.stop(id).await?;
        self.start(id).await
    }

    /// Start every service that is not running, concurrently.
    ///
    /// Returns the failures; one service failing never stops the others.
    pub async fn start_all(&self) -> Vec<BridgeError> {
        let ids: Vec<String> = self
            .adapters()
            .await
            .iter()
            .filter(|a| !a.is_running())
            .map(|a| a.id().to_string())
            .collect();

        let results = join_all(ids.iter().map(|id| self.start(id))).await;
        let errors: Vec<BridgeError> = results.into_iter().filter_map(Result::err).collect();
        info!(
            attempted = ids.len(),
            failed = errors.len(),
            "Started services"
        );
        errors
    }

    /// Stop every running service, concurrently.
    pub async fn stop_all(&self) -> Vec<BridgeError> {
        let ids: Vec<String> = self
            .running()
            .await
            .iter()
            .map(|a| a.id().to_string())
            .collect();

        let results = join_all(ids.iter().map(|id| self.stop(id))).await;
        let errors: Vec<BridgeError> = results.into_iter().filter_map(Result::err).collect();
        for e in &errors {
            warn!(error = %e, "Service failed to stop");
        }
        errors
    }

    pub async fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for adapter in self.adapters().await {
            stats.total += 1;
            match adapter.status() {
                ServiceStatus::Running => stats.running += 1,
                ServiceStatus::Starting => stats.starting += 1,
                ServiceStatus::Stopped => stats.stopped += 1,
                ServiceStatus::Error => stats.error += 1,
            }
        }
        stats
    }
}
