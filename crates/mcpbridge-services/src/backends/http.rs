use super::{ClientSlot, ServiceBackend};
use crate::http_client::HttpClient;
use crate::rpc::{self, McpChannel};
use async_trait::async_trait;
use mcpbridge_core::{
    BridgeResult, CallToolRequest, CallToolResult, HttpConfig, InitializeResult, Tool,
    TransportKind,
};
use std::sync::Arc;
use tracing::debug;

/// Remote server reached over Streamable HTTP.
pub struct HttpBackend {
    config: HttpConfig,
    client: ClientSlot<HttpClient>,
}

impl HttpBackend {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            client: ClientSlot::new(),
        }
    }
}

#[async_trait]
impl ServiceBackend for HttpBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&self) -> BridgeResult<InitializeResult> {
        let client = Arc::new(HttpClient::new(&self.config)?);
        let init = rpc::handshake(client.as_ref()).await?;
        debug!(url = %self.config.url, session = ?client.session_id(), "HTTP backend connected");
        self.client.set(client).await;
        Ok(init)
    }

    async fn fetch_tools(&self) -> BridgeResult<Vec<Tool>> {
        let client = self.client.get().await?;
        rpc::list_all_tools(client.as_ref()).await
    }

    async fn call_tool(&self, request: CallToolRequest) -> BridgeResult<CallToolResult> {
        let client = self.client.get().await?;
        rpc::call_tool(client.as_ref(), &request).await
    }

    async fn disconnect(&self) -> BridgeResult<()> {
        match self.client.take().await {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }
}
