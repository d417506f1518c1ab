//! MCP method table shared by the outbound connection and the inbound proxy.

use crate::aliases::ParamAliasTable;
use mcpbridge_core::{
    error_codes, BridgeError, CallToolRequest, CallToolResult, InitializeResult, JsonRpcMessage,
    JsonRpcResponse, RequestId, Tool,
};
use mcpbridge_services::ToolAggregator;
use std::sync::Arc;
use tracing::{debug, warn};

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// Answers MCP requests from the aggregated tool namespace.
pub struct McpHandler {
    aggregator: Arc<ToolAggregator>,
    aliases: ParamAliasTable,
}

impl McpHandler {
    pub fn new(aggregator: Arc<ToolAggregator>) -> Self {
        Self {
            aggregator,
            aliases: ParamAliasTable::default(),
        }
    }

    pub fn with_aliases(mut self, aliases: ParamAliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn aggregator(&self) -> &Arc<ToolAggregator> {
        &self.aggregator
    }

    /// Handle one decoded message.
    ///
    /// Returns the response for requests and `None` for notifications and
    /// stray responses.
    pub async fn handle(&self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        if msg.is_notification() {
            debug!(method = %msg.method_name(), "Notification received");
            return None;
        }
        if !msg.is_request() {
            debug!(id = ?msg.id, "Ignoring non-request message");
            return None;
        }
        let id = msg.id;
        let method = msg.method.unwrap_or_default();
        Some(self.handle_request(id, &method, msg.params).await)
    }

    async fn handle_request(
        &self,
        id: Option<RequestId>,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> JsonRpcResponse {
        match method {
            METHOD_INITIALIZE => {
                let result = InitializeResult::for_gateway(env!("CARGO_PKG_VERSION"));
                to_response(id, &result)
            }
            METHOD_PING => JsonRpcResponse::success(id, serde_json::json!({})),
            METHOD_TOOLS_LIST => {
                let tools: Vec<Tool> = self
                    .aggregator
                    .get_all_tools()
                    .await
                    .into_iter()
                    .map(|t| normalize_tool(t.tool))
                    .collect();
                JsonRpcResponse::success(id, serde_json::json!({ "tools": tools }))
            }
            METHOD_TOOLS_CALL => {
                let mut request: CallToolRequest =
                    match serde_json::from_value(params.unwrap_or_default()) {
                        Ok(r) => r,
                        Err(e) => {
                            return JsonRpcResponse::error(
                                id,
                                error_codes::INVALID_PARAMS,
                                format!("Invalid tools/call params: {e}"),
                            )
                        }
                    };
                self.aliases.apply(&request.name, &mut request.arguments);
                let result = self.call_tool(request).await;
                to_response(id, &result)
            }
            other => JsonRpcResponse::method_not_found(id, other),
        }
    }

    /// Route a call; routing failures become error-flagged results.
    pub async fn call_tool(&self, request: CallToolRequest) -> CallToolResult {
        let name = request.name.clone();
        match self.aggregator.call_tool(request).await {
            Ok(result) => result,
            Err(e @ (BridgeError::ToolNotFound(_) | BridgeError::ToolCallFailed(_))) => {
                warn!(tool = %name, error = %e, "Tool call could not be routed");
                CallToolResult::error(e.to_string())
            }
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }
}

fn to_response<T: serde::Serialize>(id: Option<RequestId>, value: &T) -> JsonRpcResponse {
    match serde_json::to_value(value) {
        Ok(v) => JsonRpcResponse::success(id, v),
        Err(e) => JsonRpcResponse::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
    }
}

/// Make a tool's schema acceptable to strict JSON Schema consumers.
///
/// The schema is forced to an object type and array properties without
/// `items` get string items.
pub fn normalize_tool(mut tool: Tool) -> Tool {
    let schema = &mut tool.input_schema;
    if !schema.is_object() {
        *schema = serde_json::json!({"type": "object", "properties": {}});
    }
    if let Some(obj) = schema.as_object_mut() {
        obj.entry("type").or_insert_with(|| "object".into());
        let props = obj
            .entry("properties")
            .or_insert_with(|| serde_json::json!({}));
        if let Some(props) = props.as_object_mut() {
            for prop in props.values_mut() {
                let Some(prop) = prop.as_object_mut() else {
                    continue;
                };
                if prop.get("type").and_then(|t| t.as_str()) == Some("array")
                    && !prop.contains_key("items")
                {
                    prop.insert("items".into(), serde_json::json!({"type": "string"}));
                }
            }
        }
    }
    tool
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcpbridge_core::{
        BridgeResult, EmbeddedConfig, ListToolsResult, ServiceConfig, TransportConfig,
    };
    use mcpbridge_services::{EmbeddedModule, ModuleCatalog, ServiceRegistry};
    use std::collections::HashMap;

    struct Echo;

    #[async_trait]
    impl EmbeddedModule for Echo {
        async fn initialize(&self) -> BridgeResult<InitializeResult> {
            Ok(InitializeResult::for_gateway("1.0.0"))
        }
        async fn list_tools(&self) -> BridgeResult<ListToolsResult> {
            Ok(ListToolsResult::new(vec![Tool::new("echo", "Echo").with_schema(
                serde_json::json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}, "tags": {"type": "array"}}
                }),
            )]))
        }
        async fn call_tool(&self, request: CallToolRequest) -> BridgeResult<CallToolResult> {
            Ok(CallToolResult::text(request.arguments["text"].to_string()))
        }
        async fn close(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    async fn handler() -> McpHandler {
        let catalog = ModuleCatalog::new();
        catalog.register("echo", |_| Ok(Arc::new(Echo) as Arc<dyn EmbeddedModule>));
        let registry = Arc::new(ServiceRegistry::new(catalog));
        registry
            .register(ServiceConfig::new(
                "echo",
                "Echo",
                TransportConfig::Embedded(EmbeddedConfig {
                    module: "echo".into(),
                    options: serde_json::Value::Null,
                }),
            ))
            .await
            .unwrap();
        let mut renames = HashMap::new();
        renames.insert("msg".to_string(), "text".to_string());
        let mut aliases = HashMap::new();
        aliases.insert("echo".to_string(), renames);
        McpHandler::new(Arc::new(ToolAggregator::new(registry)))
            .with_aliases(ParamAliasTable::new(aliases))
    }

    fn request(id: i64, method: &str, params: serde_json::Value) -> JsonRpcMessage {
        serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0", "id": id, "method": method, "params": params
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_advertises_list_changed() {
        let resp = handler()
            .await
            .handle(request(1, METHOD_INITIALIZE, serde_json::json!({})))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(result["serverInfo"]["name"], "mcpbridge");
    }

    #[tokio::test]
    async fn test_tools_list_normalizes_arrays() {
        let resp = handler()
            .await
            .handle(request(2, METHOD_TOOLS_LIST, serde_json::json!({})))
            .await
            .unwrap();
        let tools = &resp.result.unwrap()["tools"];
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(
            tools[0]["inputSchema"]["properties"]["tags"]["items"]["type"],
            "string"
        );
    }

    #[tokio::test]
    async fn test_tools_call_applies_aliases() {
        let resp = handler()
            .await
            .handle(request(
                3,
                METHOD_TOOLS_CALL,
                serde_json::json!({"name": "echo", "arguments": {"msg": "hi"}}),
            ))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["content"][0]["text"], "\"hi\"");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let resp = handler()
            .await
            .handle(request(
                4,
                METHOD_TOOLS_CALL,
                serde_json::json!({"name": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["isError"], true);
    }

    #[tokio::test]
    async fn test_unknown_method_keeps_id() {
        let resp = handler()
            .await
            .handle(request(9, "resources/list", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.id, Some(RequestId::Number(9)));
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let msg: JsonRpcMessage = serde_json::from_value(
            serde_json::json!({"jsonrpc": "2.0", "method": METHOD_INITIALIZED}),
        )
        .unwrap();
        assert!(handler().await.handle(msg).await.is_none());
    }

    #[test]
    fn test_normalize_non_object_schema() {
        let mut tool = Tool::new("t", "");
        tool.input_schema = serde_json::Value::Null;
        let tool = normalize_tool(tool);
        assert_eq!(tool.input_schema["type"], "object");
    }
}
