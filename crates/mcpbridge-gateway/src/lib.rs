//! Consumer-facing surfaces of the mcpbridge gateway.
//!
//! - [`OutboundConnection`] keeps a WebSocket open to a remote endpoint and
//!   serves MCP over it.
//! - [`McpProxy`] serves local MCP clients over legacy SSE and Streamable HTTP.
//! - [`ToolChangeNotifier`] tells both when the aggregated tool set changes.

pub mod aliases;
pub mod handler;
pub mod outbound;
pub mod proxy;
pub mod sync;

pub use aliases::ParamAliasTable;
pub use handler::McpHandler;
pub use outbound::{ConnectionEvent, HandshakeState, OutboundConnection};
pub use proxy::{AccessSettings, AccessSource, McpProxy, SessionStore, StaticAccess};
pub use sync::ToolChangeNotifier;
