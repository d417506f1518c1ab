//! Persistent WebSocket to the remote orchestration endpoint.
//!
//! This process opens the socket but plays the MCP *server* role on it: the
//! peer sends `initialize`, we answer, and after `notifications/initialized`
//! we may push `notifications/tools/list_changed`.

use crate::handler::{
    McpHandler, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING, METHOD_TOOLS_LIST_CHANGED,
};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use mcpbridge_core::{
    BridgeError, BridgeResult, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, OutboundConfig,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Pause between tearing down and reopening in [`OutboundConnection::reconnect`].
const RECONNECT_GRACE: Duration = Duration::from_millis(500);

const EVENT_CAPACITY: usize = 32;

/// MCP handshake progress on the current socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotInitialized,
    Initializing,
    Initialized,
}

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Initialized,
    Disconnected { manual: bool },
    /// Reconnection gave up after this many attempts.
    Failed { attempts: u32 },
}

/// Handle to the outbound connection. Clones share one socket.
#[derive(Clone)]
pub struct OutboundConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: OutboundConfig,
    handler: Arc<McpHandler>,
    state: Mutex<HandshakeState>,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    manual_close: AtomicBool,
    attempts: AtomicU32,
    /// Bumped on every open and manual close so stale readers can tell.
    generation: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
}

impl OutboundConnection {
    pub fn new(config: OutboundConfig, handler: Arc<McpHandler>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                state: Mutex::new(HandshakeState::NotInitialized),
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                heartbeat: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                manual_close: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> HandshakeState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .writer
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Open the socket. Fails if it is not up within the connect timeout.
    ///
    /// A connection failure also starts the background retry loop, bounded
    /// by the reconnect interval and attempt cap.
    pub async fn connect(&self) -> BridgeResult<()> {
        self.inner.manual_close.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }
        match Inner::connect(&self.inner).await {
            Err(e @ BridgeError::ConnectionFailed(_)) => {
                warn!(error = %e, "Outbound connect failed; retrying in background");
                self.inner.attempts.store(0, Ordering::SeqCst);
                self.inner.schedule_reconnect();
                Err(e)
            }
            other => other,
        }
    }

    /// Close the socket without triggering a reconnect.
    pub async fn disconnect(&self) {
        self.inner.close_manually();
    }

    /// Drop and reopen the socket so the peer re-runs the handshake.
    pub async fn reconnect(&self) -> BridgeResult<()> {
        info!("Reconnecting outbound connection");
        *self.inner.state.lock() = HandshakeState::NotInitialized;
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.close_manually();
        tokio::time::sleep(RECONNECT_GRACE).await;
        self.connect().await
    }

    /// Push `notifications/tools/list_changed` if the handshake is complete.
    ///
    /// Returns whether the notification was sent.
    pub fn notify_tools_changed(&self) -> bool {
        if self.state() != HandshakeState::Initialized {
            debug!(state = ?self.state(), "Skipping tools/list_changed before initialization");
            return false;
        }
        let note = JsonRpcNotification::new(METHOD_TOOLS_LIST_CHANGED, None);
        match self.inner.send_json(&note) {
            Ok(()) => {
                info!("Sent tools/list_changed to remote endpoint");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to send tools/list_changed");
                false
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn url(&self) -> BridgeResult<&str> {
        self.config
            .url
            .as_deref()
            .ok_or_else(|| BridgeError::ConfigInvalid("outbound url is not configured".into()))
    }

    async fn connect(self: &Arc<Self>) -> BridgeResult<()> {
        let url = self.url()?.to_string();
        let timeout = self.config.connect_timeout();

        let ws = match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
        {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                return Err(BridgeError::ConnectionFailed(format!("{url}: {e}")));
            }
            Err(_) => {
                return Err(BridgeError::ConnectionFailed(format!(
                    "{url}: no connection within {}s",
                    timeout.as_secs()
                )));
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        *self.state.lock() = HandshakeState::NotInitialized;
        *self.writer.lock() = Some(tx);
        self.start_heartbeat();
        self.attempts.store(0, Ordering::SeqCst);
        info!(url = %url, "Outbound connection established");
        self.emit(ConnectionEvent::Connected);

        let reader = {
            let inner = self.clone();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => inner.handle_text(&text).await,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Outbound socket error");
                            break;
                        }
                    }
                }
                inner.on_socket_closed(generation);
            })
        };

        if let Some(old) = self.reader.lock().replace(reader) {
            old.abort();
        }
        Ok(())
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let period = self.config.heartbeat_interval();
        let task = if period.is_zero() {
            None
        } else {
            let inner = self.clone();
            Some(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    let id = uuid::Uuid::new_v4().to_string();
                    let ping = JsonRpcRequest::new(id, METHOD_PING, None);
                    if let Err(e) = inner.send_json(&ping) {
                        debug!(error = %e, "Heartbeat skipped");
                    }
                }
            }))
        };
        if let Some(old) = std::mem::replace(&mut *self.heartbeat.lock(), task) {
            old.abort();
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(task) = self.heartbeat.lock().take() {
            task.abort();
        }
    }

    fn send_text(&self, text: String) -> BridgeResult<()> {
        let writer = self.writer.lock();
        let tx = writer
            .as_ref()
            .ok_or_else(|| BridgeError::ConnectionFailed("outbound socket is not open".into()))?;
        tx.send(Message::Text(text))
            .map_err(|_| BridgeError::ConnectionFailed("outbound socket is closed".into()))
    }

    fn send_json<T: serde::Serialize>(&self, value: &T) -> BridgeResult<()> {
        self.send_text(serde_json::to_string(value)?)
    }

    fn send_response(&self, response: &JsonRpcResponse) {
        if let Err(e) = self.send_json(response) {
            warn!(id = ?response.id, error = %e, "Failed to send response");
        }
    }

    async fn handle_text(self: &Arc<Self>, text: &str) {
        let msg: JsonRpcMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Unparseable message from remote endpoint");
                self.send_response(&JsonRpcResponse::parse_error(e));
                return;
            }
        };

        if msg.is_response() {
            debug!(id = ?msg.id, "Response from remote endpoint dropped");
            return;
        }

        let method = msg.method_name().to_string();
        match method.as_str() {
            METHOD_INITIALIZED if msg.is_notification() => {
                *self.state.lock() = HandshakeState::Initialized;
                info!("Remote endpoint completed the MCP handshake");
                self.emit(ConnectionEvent::Initialized);
            }
            METHOD_INITIALIZE if msg.is_request() => {
                *self.state.lock() = HandshakeState::Initializing;
                // Answered inline so the reply precedes anything read after it.
                if let Some(resp) = self.handler.handle(msg).await {
                    self.send_response(&resp);
                }
            }
            _ if msg.is_request() => {
                let inner = self.clone();
                tokio::spawn(async move {
                    if let Some(resp) = inner.handler.handle(msg).await {
                        inner.send_response(&resp);
                    }
                });
            }
            other => debug!(method = %other, "Notification from remote endpoint ignored"),
        }
    }

    fn on_socket_closed(self: &Arc<Self>, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.writer.lock().take();
        *self.state.lock() = HandshakeState::NotInitialized;
        self.stop_heartbeat();

        let manual = self.manual_close.load(Ordering::SeqCst);
        info!(manual, "Outbound connection closed");
        self.emit(ConnectionEvent::Disconnected { manual });
        if manual {
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let task = tokio::spawn(reconnect_loop(self.clone()));
        if let Some(old) = self.reconnect_task.lock().replace(task) {
            old.abort();
        }
    }

    fn close_manually(&self) {
        self.manual_close.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
        self.stop_heartbeat();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let was_open = match self.writer.lock().take() {
            Some(tx) => {
                let _ = tx.send(Message::Close(None));
                true
            }
            None => false,
        };
        *self.state.lock() = HandshakeState::NotInitialized;
        if was_open {
            info!("Outbound connection closed by request");
            self.emit(ConnectionEvent::Disconnected { manual: true });
        }
    }
}

/// Retry until connected, closed manually, or out of attempts.
fn reconnect_loop(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let interval = inner.config.reconnect_interval();
        let max = inner.config.max_reconnect_attempts;
        loop {
            if inner.manual_close.load(Ordering::SeqCst) {
                return;
            }
            let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > max {
                error!(attempts = max, "Giving up on outbound connection");
                inner.emit(ConnectionEvent::Failed { attempts: max });
                return;
            }
            tokio::time::sleep(interval).await;
            if inner.manual_close.load(Ordering::SeqCst) {
                return;
            }
            info!(attempt, max, "Reconnecting outbound connection");
            match Inner::connect(&inner).await {
                Ok(()) => return,
                Err(e) => warn!(attempt, error = %e, "Reconnect attempt failed"),
            }
        }
    })
}
