//! Client side of the MCP conversation, shared by every remote-ish transport.

use async_trait::async_trait;
use mcpbridge_core::{
    BridgeError, BridgeResult, CallToolRequest, CallToolResult, InitializeResult,
    JsonRpcResponse, ListToolsResult, RequestId, Tool, PROTOCOL_VERSION, SERVER_NAME,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::oneshot;
use tracing::debug;

/// Upper bound on `tools/list` pages followed for a single listing.
const MAX_TOOL_PAGES: usize = 100;

/// A JSON-RPC pipe to one backend MCP server.
#[async_trait]
pub trait McpChannel: Send + Sync {
    /// Send a request and wait for its `result`.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> BridgeResult<serde_json::Value>;

    /// Send a notification.
    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> BridgeResult<()>;

    /// Release the underlying transport.
    async fn close(&self) -> BridgeResult<()>;
}

/// Run the client half of the MCP handshake.
pub async fn handshake(channel: &dyn McpChannel) -> BridgeResult<InitializeResult> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    });

    let result = channel.request("initialize", Some(params)).await?;
    let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
        BridgeError::Protocol(format!("Failed to parse initialize result: {e}"))
    })?;

    channel.notify("notifications/initialized", None).await?;
    Ok(init)
}

/// Fetch every page of `tools/list`.
pub async fn list_all_tools(channel: &dyn McpChannel) -> BridgeResult<Vec<Tool>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_TOOL_PAGES {
        let params = cursor
            .as_ref()
            .map(|c| serde_json::json!({ "cursor": c }));
        let result = channel.request("tools/list", params).await?;
        let page: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| BridgeError::Protocol(format!("Failed to parse tools: {e}")))?;
        tools.extend(page.tools);

        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(tools),
        }
    }

    debug!(pages = MAX_TOOL_PAGES, "tools/list pagination cut off");
    Ok(tools)
}

/// Invoke `tools/call`.
pub async fn call_tool(
    channel: &dyn McpChannel,
    request: &CallToolRequest,
) -> BridgeResult<CallToolResult> {
    let params = serde_json::to_value(request)?;
    let result = channel.request("tools/call", Some(params)).await?;
    serde_json::from_value(result)
        .map_err(|e| BridgeError::Protocol(format!("Failed to parse tool result: {e}")))
}

/// Turn a response envelope into its `result`, or the remote error.
pub fn into_result(resp: JsonRpcResponse) -> BridgeResult<serde_json::Value> {
    if let Some(err) = resp.error {
        return Err(BridgeError::Internal(format!(
            "MCP error {}: {}",
            err.code, err.message
        )));
    }
    Ok(resp.result.unwrap_or(serde_json::Value::Null))
}

/// In-flight requests keyed by id, for transports where responses arrive
/// out of band (a stdout reader or an SSE stream).
pub(crate) struct PendingRequests {
    waiting: Mutex<Waiting>,
    next_id: AtomicI64,
}

#[derive(Default)]
struct Waiting {
    senders: HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>,
    /// Set once the transport is gone; later registrations fail immediately.
    closed: bool,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            waiting: Mutex::new(Waiting::default()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Allocate an id and a receiver for its response.
    pub(crate) fn register(&self) -> (RequestId, oneshot::Receiver<JsonRpcResponse>) {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        let mut waiting = self.waiting.lock();
        if !waiting.closed {
            waiting.senders.insert(id.clone(), tx);
        }
        (id, rx)
    }

    /// Route a response to its waiter. Returns false for unknown ids.
    pub(crate) fn resolve(&self, resp: JsonRpcResponse) -> bool {
        let Some(id) = resp.id.clone() else {
            return false;
        };
        let sender = self.waiting.lock().senders.remove(&id);
        match sender {
            Some(tx) => tx.send(resp).is_ok(),
            None => false,
        }
    }

    pub(crate) fn cancel(&self, id: &RequestId) {
        self.waiting.lock().senders.remove(id);
    }

    /// Drop every waiter and refuse new ones; receivers observe a closed channel.
    pub(crate) fn fail_all(&self) {
        let mut waiting = self.waiting.lock();
        waiting.closed = true;
        waiting.senders.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiting.lock().senders.len()
    }
}

/// Wait for a registered response and unwrap it.
pub(crate) async fn await_response(
    rx: oneshot::Receiver<JsonRpcResponse>,
    method: &str,
) -> BridgeResult<serde_json::Value> {
    let resp = rx.await.map_err(|_| {
        BridgeError::ConnectionFailed(format!(
            "MCP server closed the connection before answering '{method}'"
        ))
    })?;
    into_result(resp)
}
