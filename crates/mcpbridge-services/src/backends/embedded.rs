use super::{ClientSlot, ServiceBackend};
use crate::catalog::{EmbeddedModule, ModuleCatalog};
use async_trait::async_trait;
use mcpbridge_core::{
    BridgeResult, CallToolRequest, CallToolResult, EmbeddedConfig, InitializeResult, Tool,
    TransportKind,
};
use tracing::warn;

/// In-process module backend.
pub struct EmbeddedBackend {
    config: EmbeddedConfig,
    catalog: ModuleCatalog,
    module: ClientSlot<dyn EmbeddedModule>,
}

impl EmbeddedBackend {
    pub fn new(config: EmbeddedConfig, catalog: ModuleCatalog) -> Self {
        Self {
            config,
            catalog,
            module: ClientSlot::new(),
        }
    }
}

#[async_trait]
impl ServiceBackend for EmbeddedBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Embedded
    }

    async fn connect(&self) -> BridgeResult<InitializeResult> {
        let module = self
            .catalog
            .instantiate(&self.config.module, &self.config.options)?;

        match module.initialize().await {
            Ok(init) => {
                self.module.set(module).await;
                Ok(init)
            }
            Err(e) => {
                if let Err(close_err) = module.close().await {
                    warn!(module = %self.config.module, error = %close_err, "Module close after failed initialize");
                }
                Err(e)
            }
        }
    }

    async fn fetch_tools(&self) -> BridgeResult<Vec<Tool>> {
        let module = self.module.get().await?;
        Ok(module.list_tools().await?.tools)
    }

    async fn call_tool(&self, request: CallToolRequest) -> BridgeResult<CallToolResult> {
        let module = self.module.get().await?;
        module.call_tool(request).await
    }

    async fn disconnect(&self) -> BridgeResult<()> {
        match self.module.take().await {
            Some(module) => module.close().await,
            None => Ok(()),
        }
    }
}
