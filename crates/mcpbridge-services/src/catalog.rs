use async_trait::async_trait;
use mcpbridge_core::{
    BridgeError, BridgeResult, CallToolRequest, CallToolResult, InitializeResult,
    ListToolsResult,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Export names probed, in order, when resolving a module's factory.
pub const FACTORY_EXPORTS: [&str; 4] = ["create_server", "createServer", "default", "create"];

/// An MCP server living in this process.
///
/// These are the four operations every embedded module must provide; a
/// type that does not implement them cannot be registered as a module.
#[async_trait]
pub trait EmbeddedModule: Send + Sync {
    async fn initialize(&self) -> BridgeResult<InitializeResult>;

    async fn list_tools(&self) -> BridgeResult<ListToolsResult>;

    async fn call_tool(&self, request: CallToolRequest) -> BridgeResult<CallToolResult>;

    async fn close(&self) -> BridgeResult<()>;
}

/// Builds a module from the service's configured options.
pub type ModuleFactory =
    Arc<dyn Fn(&serde_json::Value) -> BridgeResult<Arc<dyn EmbeddedModule>> + Send + Sync>;

/// Registry of in-process modules addressable by identifier.
///
/// Cloning is cheap; clones share the same table.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    modules: Arc<RwLock<HashMap<String, HashMap<String, ModuleFactory>>>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` as the module's `create_server` export.
    pub fn register<F>(&self, module: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> BridgeResult<Arc<dyn EmbeddedModule>> + Send + Sync + 'static,
    {
        self.register_export(module, FACTORY_EXPORTS[0], factory);
    }

    /// Register a factory under an explicit export name.
    pub fn register_export<F>(&self, module: impl Into<String>, export: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> BridgeResult<Arc<dyn EmbeddedModule>> + Send + Sync + 'static,
    {
        let module = module.into();
        let export = export.into();
        tracing::debug!(module = %module, export = %export, "Registered embedded module export");
        self.modules
            .write()
            .entry(module)
            .or_default()
            .insert(export, Arc::new(factory));
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.read().contains_key(module)
    }

    /// Registered module identifiers, sorted.
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Find the module's factory under one of the conventional export names.
    pub fn resolve(&self, module: &str) -> BridgeResult<ModuleFactory> {
        let modules = self.modules.read();
        let exports = modules.get(module).ok_or_else(|| {
            BridgeError::ConfigInvalid(format!("embedded module '{module}' is not registered"))
        })?;

        FACTORY_EXPORTS
            .iter()
            .find_map(|name| exports.get(*name).cloned())
            .ok_or_else(|| {
                let mut found: Vec<&str> = exports.keys().map(String::as_str).collect();
                found.sort_unstable();
                BridgeError::ConfigInvalid(format!(
                    "embedded module '{module}' exports none of {FACTORY_EXPORTS:?} (found: {found:?})"
                ))
            })
    }

    /// Resolve and invoke the factory.
    pub fn instantiate(
        &self,
        module: &str,
        options: &serde_json::Value,
    ) -> BridgeResult<Arc<dyn EmbeddedModule>> {
        let factory = self.resolve(module)?;
        factory(options)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mcpbridge_core::Tool;

    struct Nop;

    #[async_trait]
    impl EmbeddedModule for Nop {
        async fn initialize(&self) -> BridgeResult<InitializeResult> {
            Ok(InitializeResult::for_gateway("0.0.0"))
        }
        async fn list_tools(&self) -> BridgeResult<ListToolsResult> {
            Ok(ListToolsResult::new(vec![Tool::new("nop", "")]))
        }
        async fn call_tool(&self, _request: CallToolRequest) -> BridgeResult<CallToolResult> {
            Ok(CallToolResult::text("ok"))
        }
        async fn close(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn nop_factory(_: &serde_json::Value) -> BridgeResult<Arc<dyn EmbeddedModule>> {
        Ok(Arc::new(Nop))
    }

    #[test]
    fn test_resolve_conventional_names_in_order() {
        let catalog = ModuleCatalog::new();
        catalog.register_export("m", "default", nop_factory);
        assert!(catalog.resolve("m").is_ok());

        catalog.register_export("other", "somethingElse", nop_factory);
        let err = catalog.resolve("other").err().unwrap();
        assert!(err.to_string().contains("somethingElse"));
    }

    #[test]
    fn test_unknown_module() {
        let catalog = ModuleCatalog::new();
        assert!(!catalog.contains("ghost"));
        assert!(matches!(
            catalog.resolve("ghost"),
            Err(BridgeError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_clones_share_table() {
        let catalog = ModuleCatalog::new();
        let clone = catalog.clone();
        clone.register("calc", nop_factory);
        assert_eq!(catalog.module_names(), vec!["calc".to_string()]);
        assert!(catalog.instantiate("calc", &serde_json::Value::Null).is_ok());
    }

    #[test]
    fn test_factory_receives_options() {
        let catalog = ModuleCatalog::new();
        catalog.register("strict", |opts: &serde_json::Value| {
            if opts.get("token").is_some() {
                Ok(Arc::new(Nop) as Arc<dyn EmbeddedModule>)
            } else {
                Err(BridgeError::ConfigInvalid("token option required".into()))
            }
        });
        assert!(catalog
            .instantiate("strict", &serde_json::json!({"token": "t"}))
            .is_ok());
        assert!(catalog.instantiate("strict", &serde_json::json!({})).is_err());
    }
}
