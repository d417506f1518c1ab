//! Pushes tool-list changes to both consumer surfaces.

use crate::outbound::OutboundConnection;
use crate::proxy::McpProxy;
use mcpbridge_services::{RegistryEvent, ToolAggregator};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reacts to registry events by notifying consumers when the tool set moved.
pub struct ToolChangeNotifier {
    aggregator: Arc<ToolAggregator>,
    outbound: Option<OutboundConnection>,
    proxy: Option<Arc<McpProxy>>,
    reconnect_on_change: bool,
}

impl ToolChangeNotifier {
    pub fn new(aggregator: Arc<ToolAggregator>) -> Self {
        Self {
            aggregator,
            outbound: None,
            proxy: None,
            reconnect_on_change: false,
        }
    }

    pub fn with_outbound(mut self, outbound: OutboundConnection, reconnect_on_change: bool) -> Self {
        self.outbound = Some(outbound);
        self.reconnect_on_change = reconnect_on_change;
        self
    }

    pub fn with_proxy(mut self, proxy: Arc<McpProxy>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Handle one event. Returns whether the tool set changed.
    pub async fn on_event(&self, event: &RegistryEvent) -> bool {
        if !event.affects_tools() {
            return false;
        }
        if !self.aggregator.snapshot_and_check_changed().await {
            debug!(service = %event.service_id(), "Tool set unchanged");
            return false;
        }
        info!(service = %event.service_id(), "Tool set changed; notifying consumers");
        self.notify().await;
        true
    }

    async fn notify(&self) {
        if let Some(outbound) = &self.outbound {
            if self.reconnect_on_change {
                if let Err(e) = outbound.reconnect().await {
                    warn!(error = %e, "Reconnect after tool change failed");
                }
            } else {
                outbound.notify_tools_changed();
            }
        }
        if let Some(proxy) = &self.proxy {
            proxy.broadcast_tools_changed();
        }
    }

    /// Consume registry events until the channel closes.
    pub fn spawn(self, mut events: broadcast::Receiver<RegistryEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.on_event(&event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed registry events; rechecking tool set");
                        if self.aggregator.snapshot_and_check_changed().await {
                            self.notify().await;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
