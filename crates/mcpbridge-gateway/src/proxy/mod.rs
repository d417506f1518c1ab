//! Local MCP server speaking both legacy SSE and Streamable HTTP.
//!
//! Both transports share one path and one [`McpHandler`]:
//!
//! - `GET` opens a legacy event stream whose first event names the POST
//!   endpoint (`<path>?sessionId=...`); responses arrive on that stream.
//! - `POST` with `sessionId` in the query is a legacy message; otherwise it
//!   is Streamable HTTP, keyed by the `mcp-session-id` header.
//! - `DELETE` ends a Streamable HTTP session.

mod access;
mod routes;
mod session;

pub use access::{access_middleware, AccessSettings, AccessSource, StaticAccess};
pub use session::SessionStore;

use crate::handler::{McpHandler, METHOD_TOOLS_LIST_CHANGED};
use axum::{
    http::StatusCode,
    middleware as axum_mw,
    response::{sse::Event, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mcpbridge_core::{BridgeError, BridgeResult, JsonRpcNotification, JsonRpcResponse, ProxyConfig};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Header carrying the Streamable HTTP session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shared state of the proxy routes.
pub struct ProxyState {
    pub handler: Arc<McpHandler>,
    pub sessions: Arc<SessionStore>,
    pub path: String,
    pub ping_interval: Duration,
    closing: watch::Sender<bool>,
}

/// The inbound proxy.
pub struct McpProxy {
    state: Arc<ProxyState>,
    access: Arc<dyn AccessSource>,
}

impl McpProxy {
    pub fn new(handler: Arc<McpHandler>, config: &ProxyConfig) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            state: Arc::new(ProxyState {
                handler,
                sessions: Arc::new(SessionStore::new()),
                path: config.path.clone(),
                ping_interval: config.ping_interval(),
                closing,
            }),
            access: Arc::new(StaticAccess(AccessSettings::from(config))),
        }
    }

    /// Read access settings from `source` instead of the config.
    pub fn with_access(mut self, source: Arc<dyn AccessSource>) -> Self {
        self.access = source;
        self
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.state.sessions.clone()
    }

    pub fn path(&self) -> &str {
        &self.state.path
    }

    /// Build the axum router with access control applied.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &self.state.path,
                get(routes::get_handler)
                    .post(routes::post_handler)
                    .delete(routes::delete_handler),
            )
            .with_state(self.state.clone())
            .layer(axum_mw::from_fn_with_state(
                self.access.clone(),
                access_middleware,
            ))
    }

    /// Tell every legacy SSE client that the tool list changed.
    ///
    /// Streamable HTTP sessions are left alone.
    pub fn broadcast_tools_changed(&self) -> usize {
        let note = JsonRpcNotification::new(METHOD_TOOLS_LIST_CHANGED, None);
        let event = match Event::default().event("message").json_data(&note) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode tools/list_changed");
                return 0;
            }
        };
        let delivered = self.state.sessions.broadcast_legacy(&event);
        info!(sessions = delivered, "Broadcast tools/list_changed to legacy SSE clients");
        delivered
    }

    /// End every open stream and forget all sessions.
    pub fn close_sessions(&self) {
        self.state.closing.send_replace(true);
        self.state.sessions.clear();
    }

    /// Serve until `shutdown` resolves, then close sessions and drain.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> BridgeResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, path = %self.state.path, "MCP proxy listening");

        let state = self.state.clone();
        let shutdown = async move {
            shutdown.await;
            state.closing.send_replace(true);
            state.sessions.clear();
        };
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(BridgeError::Io)
    }
}

/// JSON-RPC error body with a null id.
pub(crate) fn jsonrpc_error_response(status: StatusCode, code: i64, message: &str) -> Response {
    (status, Json(JsonRpcResponse::error(None, code, message))).into_response()
}
