use axum::response::sse::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// A Streamable HTTP session. Set `initialized` once the client has sent
/// `notifications/initialized` on it.
#[derive(Debug, Clone, Copy, Default)]
struct StreamableSession {
    initialized: bool,
}

/// Open sessions of both proxy transports.
///
/// Legacy SSE sessions own the sending half of their event stream;
/// Streamable HTTP sessions only track their handshake.
#[derive(Default)]
pub struct SessionStore {
    legacy: RwLock<HashMap<String, mpsc::Sender<Event>>>,
    streamable: RwLock<HashMap<String, StreamableSession>>,
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a legacy stream and return its session id.
    pub fn open_legacy(&self, tx: mpsc::Sender<Event>) -> String {
        let id = new_session_id();
        self.legacy.write().insert(id.clone(), tx);
        debug!(session = %id, "Legacy SSE session opened");
        id
    }

    pub fn legacy_sender(&self, id: &str) -> Option<mpsc::Sender<Event>> {
        self.legacy.read().get(id).cloned()
    }

    pub fn has_legacy(&self, id: &str) -> bool {
        self.legacy.read().contains_key(id)
    }

    pub fn close_legacy(&self, id: &str) -> bool {
        let removed = self.legacy.write().remove(id).is_some();
        if removed {
            debug!(session = %id, "Legacy SSE session closed");
        }
        removed
    }

    pub fn legacy_count(&self) -> usize {
        self.legacy.read().len()
    }

    /// Queue `event` on every legacy stream; returns how many accepted it.
    ///
    /// Streams whose client has gone away are dropped.
    pub fn broadcast_legacy(&self, event: &Event) -> usize {
        let senders: Vec<(String, mpsc::Sender<Event>)> = self
            .legacy
            .read()
            .iter()
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in senders {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(session = %id, "Legacy SSE session backlogged; event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.close_legacy(&id);
                }
            }
        }
        delivered
    }

    pub fn open_streamable(&self) -> String {
        let id = new_session_id();
        self.streamable
            .write()
            .insert(id.clone(), StreamableSession::default());
        debug!(session = %id, "Streamable HTTP session opened");
        id
    }

    pub fn has_streamable(&self, id: &str) -> bool {
        self.streamable.read().contains_key(id)
    }

    /// Record that the client completed the handshake on this session.
    pub fn mark_streamable_initialized(&self, id: &str) -> bool {
        match self.streamable.write().get_mut(id) {
            Some(session) => {
                session.initialized = true;
                debug!(session = %id, "Streamable HTTP session initialized");
                true
            }
            None => false,
        }
    }

    pub fn is_streamable_initialized(&self, id: &str) -> bool {
        self.streamable
            .read()
            .get(id)
            .is_some_and(|session| session.initialized)
    }

    pub fn close_streamable(&self, id: &str) -> bool {
        let removed = self.streamable.write().remove(id).is_some();
        if removed {
            debug!(session = %id, "Streamable HTTP session closed");
        }
        removed
    }

    pub fn streamable_count(&self) -> usize {
        self.streamable.read().len()
    }

    /// Forget every session; legacy streams end once their ping task notices.
    pub fn clear(&self) {
        self.legacy.write().clear();
        self.streamable.write().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_streamable_sessions() {
        let store = SessionStore::new();
        let id = store.open_streamable();
        assert!(store.has_streamable(&id));
        assert!(!store.has_legacy(&id));
        assert!(!store.is_streamable_initialized(&id));
        assert!(store.mark_streamable_initialized(&id));
        assert!(store.is_streamable_initialized(&id));
        assert!(!store.mark_streamable_initialized("missing"));
        assert!(store.close_streamable(&id));
        assert!(!store.close_streamable(&id));
    }

    #[tokio::test]
    async fn test_broadcast_prunes_closed_streams() {
        let store = SessionStore::new();
        let (live_tx, mut live_rx) = mpsc::channel(4);
        let (dead_tx, dead_rx) = mpsc::channel(4);
        store.open_legacy(live_tx);
        store.open_legacy(dead_tx);
        drop(dead_rx);

        let delivered = store.broadcast_legacy(&Event::default().event("message").data("{}"));
        assert_eq!(delivered, 1);
        assert_eq!(store.legacy_count(), 1);
        assert!(live_rx.recv().await.is_some());
    }
}
