//! Uniform lifecycle over one backend MCP server.

use crate::backends::ServiceBackend;
use chrono::{DateTime, Utc};
use mcpbridge_core::{
    BridgeError, BridgeResult, CallToolRequest, CallToolResult, InitializeResult, ServiceConfig,
    Tool, TransportKind,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a service, for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub kind: TransportKind,
    pub enabled: bool,
    pub status: ServiceStatus,
    pub tool_count: usize,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

struct AdapterState {
    status: ServiceStatus,
    tools: Vec<Tool>,
    server: Option<InitializeResult>,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

/// One configured backend server plus its status and cached tool list.
pub struct ServiceAdapter {
    config: ServiceConfig,
    backend: Arc<dyn ServiceBackend>,
    /// Serializes initialize/close so they never interleave.
    lifecycle: tokio::sync::Mutex<()>,
    state: RwLock<AdapterState>,
}

impl ServiceAdapter {
    pub fn new(config: ServiceConfig, backend: Arc<dyn ServiceBackend>) -> Self {
        Self {
            config,
            backend,
            lifecycle: tokio::sync::Mutex::new(()),
            state: RwLock::new(AdapterState {
                status: ServiceStatus::Stopped,
                tools: Vec::new(),
                server: None,
                last_error: None,
                started_at: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn status(&self) -> ServiceStatus {
        self.state.read().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == ServiceStatus::Running
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }

    /// What the backend reported during the handshake.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.state.read().server.clone()
    }

    pub fn info(&self) -> ServiceInfo {
        let state = self.state.read();
        ServiceInfo {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            kind: self.backend.kind(),
            enabled: self.config.enabled,
            status: state.status,
            tool_count: state.tools.len(),
            last_error: state.last_error.clone(),
            started_at: state.started_at,
        }
    }

    /// Connect to the backend and cache its tools.
    ///
    /// Fails with `ServiceAlreadyRunning` when running and refuses to start
    /// from `Error`; close first in that case.
    pub async fn initialize(&self) -> BridgeResult<()> {
        let _guard = self.lifecycle.lock().await;

        {
            let mut state = self.state.write();
            match state.status {
                ServiceStatus::Running => {
                    return Err(BridgeError::ServiceAlreadyRunning(self.config.id.clone()))
                }
                ServiceStatus::Error => {
                    return Err(BridgeError::ServiceInitializationFailed {
                        id: self.config.id.clone(),
                        reason: "service is in error state; close it before restarting".into(),
                    })
                }
                ServiceStatus::Starting | ServiceStatus::Stopped => {}
            }
            state.status = ServiceStatus::Starting;
            state.last_error = None;
        }

        debug!(service = %self.config.id, kind = %self.backend.kind(), "Initializing service");

        let init = match self.backend.connect().await {
            Ok(init) => init,
            Err(e) => {
                if let Err(cleanup) = self.backend.disconnect().await {
                    warn!(service = %self.config.id, error = %cleanup, "Cleanup after failed start");
                }
                let reason = e.to_string();
                let mut state = self.state.write();
                state.status = ServiceStatus::Error;
                state.last_error = Some(reason.clone());
                return Err(BridgeError::ServiceInitializationFailed {
                    id: self.config.id.clone(),
                    reason,
                });
            }
        };

        let tools = match self.backend.fetch_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(service = %self.config.id, error = %e, "Initial tool listing failed");
                Vec::new()
            }
        };

        let server_name = init
            .server_info
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("unknown");
        info!(
            service = %self.config.id,
            server = %server_name,
            tools = tools.len(),
            "Service running"
        );

        let mut state = self.state.write();
        state.status = ServiceStatus::Running;
        state.tools = tools;
        state.server = Some(init);
        state.started_at = Some(Utc::now());
        Ok(())
    }

    /// Cached tool list.
    pub async fn list_tools(&self) -> BridgeResult<Vec<Tool>> {
        let state = self.state.read();
        if state.status != ServiceStatus::Running {
            return Err(BridgeError::ServiceNotRunning(self.config.id.clone()));
        }
        Ok(state.tools.clone())
    }

    /// Ask the backend again and replace the cache.
    pub async fn refresh_tools(&self) -> BridgeResult<Vec<Tool>> {
        if !self.is_running() {
            return Err(BridgeError::ServiceNotRunning(self.config.id.clone()));
        }
        let tools = self.backend.fetch_tools().await?;
        self.state.write().tools = tools.clone();
        Ok(tools)
    }

    /// Invoke a tool on the backend.
    ///
    /// Backend failures come back as an error-flagged result, not `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> BridgeResult<CallToolResult> {
        if !self.is_running() {
            return Err(BridgeError::ServiceNotRunning(self.config.id.clone()));
        }
        match self
            .backend
            .call_tool(CallToolRequest::new(name, arguments))
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(service = %self.config.id, tool = %name, error = %e, "Tool call failed");
                Ok(CallToolResult::error(e.to_string()))
            }
        }
    }

    /// Tear down and go to `Stopped`. A no-op when already stopped.
    pub async fn close(&self) -> BridgeResult<()> {
        let _guard = self.lifecycle.lock().await;

        if self.status() == ServiceStatus::Stopped {
            return Ok(());
        }

        if let Err(e) = self.backend.disconnect().await {
            warn!(service = %self.config.id, error = %e, "Service teardown reported an error");
        }

        let mut state = self.state.write();
        state.status = ServiceStatus::Stopped;
        state.tools.clear();
        state.server = None;
        state.started_at = None;
        info!(service = %self.config.id, "Service stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcpbridge_core::{EmbeddedConfig, TransportConfig};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockBackend {
        fail_connect: AtomicBool,
        fail_calls: AtomicBool,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl ServiceBackend for MockBackend {
        fn kind(&self) -> TransportKind {
            TransportKind::Embedded
        }
        async fn connect(&self) -> BridgeResult<InitializeResult> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(BridgeError::ConnectionFailed("refused".into()));
            }
            Ok(InitializeResult::for_gateway("1.0.0"))
        }
        async fn fetch_tools(&self) -> BridgeResult<Vec<Tool>> {
            Ok(vec![Tool::new("a", ""), Tool::new("b", "")])
        }
        async fn call_tool(&self, request: CallToolRequest) -> BridgeResult<CallToolResult> {
            if self.fail_calls.load(Ordering::SeqCst) {
                return Err(BridgeError::ConnectionFailed("pipe closed".into()));
            }
            Ok(CallToolResult::text(format!("called {}", request.name)))
        }
        async fn disconnect(&self) -> BridgeResult<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn adapter() -> (ServiceAdapter, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::default());
        let config = ServiceConfig::new(
            "svc",
            "Service",
            TransportConfig::Embedded(EmbeddedConfig {
                module: "m".into(),
                options: serde_json::Value::Null,
            }),
        );
        (ServiceAdapter::new(config, backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_lifecycle_happy_path() {
        let (adapter, _) = adapter();
        assert_eq!(adapter.status(), ServiceStatus::Stopped);
        assert!(matches!(
            adapter.list_tools().await,
            Err(BridgeError::ServiceNotRunning(_))
        ));

        adapter.initialize().await.unwrap();
        assert!(adapter.is_running());
        assert_eq!(adapter.list_tools().await.unwrap().len(), 2);
        let info = adapter.info();
        assert_eq!(info.tool_count, 2);
        assert!(info.started_at.is_some());

        adapter.close().await.unwrap();
        assert_eq!(adapter.status(), ServiceStatus::Stopped);
        assert_eq!(adapter.info().tool_count, 0);
    }

    #[tokio::test]
    async fn test_initialize_twice_is_already_running() {
        let (adapter, backend) = adapter();
        adapter.initialize().await.unwrap();
        let err = adapter.initialize().await.unwrap_err();
        assert!(matches!(err, BridgeError::ServiceAlreadyRunning(_)));
        assert_eq!(backend.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_start_goes_to_error_and_cleans_up() {
        let (adapter, backend) = adapter();
        backend.fail_connect.store(true, Ordering::SeqCst);

        let err = adapter.initialize().await.unwrap_err();
        assert!(matches!(err, BridgeError::ServiceInitializationFailed { .. }));
        assert_eq!(adapter.status(), ServiceStatus::Error);
        assert!(adapter.last_error().unwrap().contains("refused"));
        assert_eq!(backend.disconnects.load(Ordering::SeqCst), 1);

        // Error refuses a direct restart.
        backend.fail_connect.store(false, Ordering::SeqCst);
        assert!(adapter.initialize().await.is_err());

        adapter.close().await.unwrap();
        assert_eq!(adapter.status(), ServiceStatus::Stopped);
        adapter.initialize().await.unwrap();
        assert!(adapter.is_running());
        assert!(adapter.last_error().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (adapter, backend) = adapter();
        adapter.close().await.unwrap();
        assert_eq!(backend.disconnects.load(Ordering::SeqCst), 0);

        adapter.initialize().await.unwrap();
        adapter.close().await.unwrap();
        adapter.close().await.unwrap();
        assert_eq!(backend.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_failure_becomes_error_result() {
        let (adapter, backend) = adapter();
        assert!(matches!(
            adapter.call_tool("a", serde_json::json!({})).await,
            Err(BridgeError::ServiceNotRunning(_))
        ));

        adapter.initialize().await.unwrap();
        let ok = adapter.call_tool("a", serde_json::json!({})).await.unwrap();
        assert_eq!(ok.joined_text(), "called a");

        backend.fail_calls.store(true, Ordering::SeqCst);
        let failed = adapter.call_tool("a", serde_json::json!({})).await.unwrap();
        assert!(failed.is_error);
        assert!(failed.joined_text().contains("pipe closed"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(ServiceStatus::Running).unwrap(),
            serde_json::json!("running")
        );
    }
}
