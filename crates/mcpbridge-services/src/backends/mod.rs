//! Transport-specific halves of a service adapter.
//!
//! A backend only knows how to reach its server; status tracking, caching
//! and error shaping live in [`crate::adapter::ServiceAdapter`].

mod embedded;
mod http;
mod sse;
mod stdio;

pub use embedded::EmbeddedBackend;
pub use http::HttpBackend;
pub use sse::SseBackend;
pub use stdio::{spawn_error_hint, StdioBackend, STDIO_CONNECT_TIMEOUT};

use crate::catalog::ModuleCatalog;
use async_trait::async_trait;
use mcpbridge_core::{
    BridgeResult, CallToolRequest, CallToolResult, InitializeResult, ServiceConfig, Tool,
    TransportConfig, TransportKind,
};
use std::sync::Arc;

/// One way of talking to a backend MCP server.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish the transport and complete the MCP handshake.
    async fn connect(&self) -> BridgeResult<InitializeResult>;

    /// Ask the server for its current tools.
    async fn fetch_tools(&self) -> BridgeResult<Vec<Tool>>;

    async fn call_tool(&self, request: CallToolRequest) -> BridgeResult<CallToolResult>;

    /// Tear the transport down. Must tolerate being called when never connected.
    async fn disconnect(&self) -> BridgeResult<()>;
}

/// Build the backend matching a service's transport.
pub fn build_backend(config: &ServiceConfig, catalog: &ModuleCatalog) -> Arc<dyn ServiceBackend> {
    match &config.transport {
        TransportConfig::Stdio(c) => Arc::new(StdioBackend::new(c.clone())),
        TransportConfig::Embedded(c) => Arc::new(EmbeddedBackend::new(c.clone(), catalog.clone())),
        TransportConfig::Sse(c) => Arc::new(SseBackend::new(c.clone())),
        TransportConfig::Http(c) => Arc::new(HttpBackend::new(c.clone())),
    }
}

/// Shared slot holding a live client between `connect` and `disconnect`.
pub(crate) struct ClientSlot<C: ?Sized> {
    inner: tokio::sync::RwLock<Option<Arc<C>>>,
}

impl<C: ?Sized> ClientSlot<C> {
    pub(crate) fn new() -> Self {
        Self {
            inner: tokio::sync::RwLock::new(None),
        }
    }

    pub(crate) async fn set(&self, client: Arc<C>) {
        *self.inner.write().await = Some(client);
    }

    pub(crate) async fn take(&self) -> Option<Arc<C>> {
        self.inner.write().await.take()
    }

    /// The live client, or a "not connected" error.
    pub(crate) async fn get(&self) -> BridgeResult<Arc<C>> {
        self.inner.read().await.clone().ok_or_else(|| {
            mcpbridge_core::BridgeError::ConnectionFailed("backend is not connected".into())
        })
    }
}
