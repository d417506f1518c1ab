//! Backend side of the mcpbridge gateway.
//!
//! Adapters wrap each configured MCP server behind one lifecycle, the
//! [`ServiceRegistry`] owns them, and the [`ToolAggregator`] merges their
//! tools into a single namespace.

pub mod adapter;
pub mod aggregator;
pub mod backends;
pub mod catalog;
pub mod client;
pub mod http_client;
pub mod limit;
pub mod registry;
pub mod rpc;
pub mod runtime_state;
pub mod sse;
pub mod sse_client;

pub use adapter::{ServiceAdapter, ServiceInfo, ServiceStatus};
pub use aggregator::{ServiceFilter, ToolAggregator};
pub use backends::{build_backend, ServiceBackend};
pub use catalog::{EmbeddedModule, ModuleCatalog, ModuleFactory};
pub use client::StdioClient;
pub use http_client::HttpClient;
pub use limit::{truncate_text, ResultLimiter, TRUNCATION_MARKER};
pub use registry::{RegistryEvent, RegistryStats, ServiceRegistry};
pub use rpc::McpChannel;
pub use runtime_state::{MemoryRuntimeState, RuntimeStateStore};
pub use sse_client::SseClient;
