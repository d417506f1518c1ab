use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a single backend MCP service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Stable id; primary key across the gateway.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Start the service as soon as it is registered (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub transport: TransportConfig,
}

/// Transport-specific connection parameters, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Subprocess speaking MCP over stdin/stdout.
    Stdio(StdioConfig),
    /// In-process module resolved through the module catalog.
    Embedded(EmbeddedConfig),
    /// Remote server using the legacy SSE transport.
    Sse(SseConfig),
    /// Remote server using the Streamable HTTP transport.
    Http(HttpConfig),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StdioConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Merged over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmbeddedConfig {
    /// Catalog identifier of the module.
    pub module: String,
    /// Passed verbatim to the module factory.
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SseConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Discriminant of [`TransportConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Embedded,
    Sse,
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Embedded => "embedded",
            Self::Sse => "sse",
            Self::Http => "http",
        })
    }
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Embedded(_) => TransportKind::Embedded,
            Self::Sse(_) => TransportKind::Sse,
            Self::Http(_) => TransportKind::Http,
        }
    }
}

impl ServiceConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            transport,
        }
    }

    /// Builder-style override of `enabled`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Reject configurations no adapter could ever start.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.id.trim().is_empty() {
            return Err(BridgeError::ConfigInvalid("service id is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(BridgeError::ConfigInvalid(format!(
                "service '{}' has an empty name",
                self.id
            )));
        }
        match &self.transport {
            TransportConfig::Stdio(c) if c.command.trim().is_empty() => Err(
                BridgeError::ConfigInvalid(format!("service '{}' has an empty command", self.id)),
            ),
            TransportConfig::Embedded(c) if c.module.trim().is_empty() => Err(
                BridgeError::ConfigInvalid(format!("service '{}' has an empty module", self.id)),
            ),
            TransportConfig::Sse(SseConfig { url, .. })
            | TransportConfig::Http(HttpConfig { url, .. }) => validate_url(&self.id, url),
            _ => Ok(()),
        }
    }
}

fn validate_url(id: &str, url: &str) -> BridgeResult<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(BridgeError::ConfigInvalid(format!(
            "service '{id}' has an invalid url '{url}' (expected http:// or https://)"
        )))
    }
}

fn default_true() -> bool {
    true
}

/// Settings of the outbound WebSocket connection to the orchestration endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OutboundConfig {
    /// `ws://` or `wss://` endpoint. No outbound connection when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Force a full reconnect instead of a `list_changed` notification.
    #[serde(default)]
    pub reconnect_on_tools_changed: bool,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_interval_ms: default_reconnect_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect_on_tools_changed: false,
        }
    }
}

impl OutboundConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_reconnect_interval() -> u64 {
    5_000
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_heartbeat_interval() -> u64 {
    50_000
}
fn default_connect_timeout() -> u64 {
    10_000
}

/// Settings of the inbound dual-transport proxy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Route serving GET (legacy SSE), POST and DELETE.
    #[serde(default = "default_path")]
    pub path: String,
    /// Required `Authorization: Bearer` token. Empty or unset means no auth.
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            path: default_path(),
            bearer_token: None,
            ping_interval_ms: default_ping_interval(),
        }
    }
}

impl ProxyConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3282
}
fn default_path() -> String {
    "/mcp".to_string()
}
fn default_ping_interval() -> u64 {
    15_000
}

/// Settings of the tool aggregator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AggregatorConfig {
    /// Byte budget for the text content of a single tool result.
    #[serde(default = "default_max_result_bytes")]
    pub max_result_bytes: usize,
    /// Per-call deadline in milliseconds. Set to 0 to disable.
    #[serde(default = "default_tool_call_timeout")]
    pub tool_call_timeout_ms: u64,
    /// Only aggregate these service ids. Empty means every service.
    #[serde(default)]
    pub services: Vec<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_result_bytes: default_max_result_bytes(),
            tool_call_timeout_ms: default_tool_call_timeout(),
            services: Vec::new(),
        }
    }
}

impl AggregatorConfig {
    pub fn tool_call_timeout(&self) -> Option<Duration> {
        (self.tool_call_timeout_ms > 0).then(|| Duration::from_millis(self.tool_call_timeout_ms))
    }
}

fn default_max_result_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_tool_call_timeout() -> u64 {
    120_000
}

/// Root configuration of the gateway.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    /// Tool name → (remote argument name → argument name the tool expects).
    #[serde(default)]
    pub param_aliases: HashMap<String, HashMap<String, String>>,
}

impl BridgeConfig {
    /// Validate every service and reject duplicate ids.
    pub fn validate(&self) -> BridgeResult<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            service.validate()?;
            if !seen.insert(service.id.as_str()) {
                return Err(BridgeError::ConfigInvalid(format!(
                    "duplicate service id '{}'",
                    service.id
                )));
            }
        }
        if let Some(url) = &self.outbound.url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(BridgeError::ConfigInvalid(format!(
                    "outbound url '{url}' must start with ws:// or wss://"
                )));
            }
        }
        if !self.proxy.path.starts_with('/') {
            return Err(BridgeError::ConfigInvalid(format!(
                "proxy path '{}' must start with '/'",
                self.proxy.path
            )));
        }
        Ok(())
    }
}
