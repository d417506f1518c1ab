use super::{ClientSlot, ServiceBackend};
use crate::rpc::{self, McpChannel};
use crate::sse_client::SseClient;
use async_trait::async_trait;
use mcpbridge_core::{
    BridgeResult, CallToolRequest, CallToolResult, InitializeResult, SseConfig, Tool,
    TransportKind,
};
use std::sync::Arc;

/// Remote server reached over legacy HTTP+SSE.
pub struct SseBackend {
    config: SseConfig,
    client: ClientSlot<SseClient>,
}

impl SseBackend {
    pub fn new(config: SseConfig) -> Self {
        Self {
            config,
            client: ClientSlot::new(),
        }
    }
}

#[async_trait]
impl ServiceBackend for SseBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(&self) -> BridgeResult<InitializeResult> {
        let client = Arc::new(SseClient::connect(&self.config).await?);
        match rpc::handshake(client.as_ref()).await {
            Ok(init) => {
                self.client.set(client).await;
                Ok(init)
            }
            Err(e) => {
                client.close().await?;
                Err(e)
            }
        }
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
