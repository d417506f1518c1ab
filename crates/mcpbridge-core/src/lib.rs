//! Core types and error definitions for the mcpbridge gateway.
//!
//! This crate provides the foundational types shared across all mcpbridge crates,
//! including error handling, JSON-RPC 2.0 envelopes, MCP payload shapes, and the
//! service / gateway configuration model.
//!
//! # Main types
//!
//! - [`BridgeError`]: Unified error enum for every gateway subsystem.
//! - [`BridgeResult`]: Convenience alias for `Result<T, BridgeError>`.
//! - [`JsonRpcMessage`]: A decoded inbound JSON-RPC envelope of any kind.
//! - [`Tool`], [`CallToolRequest`], [`CallToolResult`]: MCP tool payloads.
//! - [`ServiceConfig`]: Configuration of a single backend MCP service.
//! - [`BridgeConfig`]: Root configuration of the whole gateway.

/// Gateway and service configuration.
pub mod config;
/// Error taxonomy.
pub mod error;
/// MCP payload types carried inside JSON-RPC messages.
pub mod mcp;
/// JSON-RPC 2.0 envelopes and error codes.
pub mod protocol;

pub use config::{
    AggregatorConfig, BridgeConfig, EmbeddedConfig, HttpConfig, OutboundConfig, ProxyConfig,
    ServiceConfig, SseConfig, StdioConfig, TransportConfig, TransportKind,
};
pub use error::{BridgeError, BridgeResult};
pub use mcp::{
    AggregatedTool, CallToolRequest, CallToolResult, Content, Implementation, InitializeResult,
    ListToolsResult, ServerCapabilities, Tool,
};
pub use protocol::{
    error_codes, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};

/// MCP protocol revision spoken by the gateway on both of its surfaces.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name the gateway reports in `serverInfo` / `clientInfo`.
pub const SERVER_NAME: &str = "mcpbridge";
