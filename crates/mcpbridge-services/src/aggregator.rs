//! One tool namespace over every running service.

use crate::limit::ResultLimiter;
use crate::registry::ServiceRegistry;
use futures_util::future::join_all;
use mcpbridge_core::{
    AggregatedTool, AggregatorConfig, BridgeError, BridgeResult, CallToolRequest, CallToolResult,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Decides whether a service contributes to the namespace.
pub type ServiceFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct ToolAggregator {
    registry: Arc<ServiceRegistry>,
    filter: Option<ServiceFilter>,
    limiter: ResultLimiter,
    call_timeout: Option<Duration>,
    last_fingerprint: Mutex<String>,
}

impl ToolAggregator {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            filter: None,
            limiter: ResultLimiter::default(),
            call_timeout: None,
            last_fingerprint: Mutex::new(String::new()),
        }
    }

    /// Apply result limit, call deadline and allow-list from config.
    pub fn from_config(registry: Arc<ServiceRegistry>, config: &AggregatorConfig) -> Self {
        let mut aggregator = Self::new(registry)
            .with_limiter(ResultLimiter::new(config.max_result_bytes))
            .with_call_timeout(config.tool_call_timeout());
        if !config.services.is_empty() {
            let allowed: HashSet<String> = config.services.iter().cloned().collect();
            aggregator = aggregator.with_filter(Arc::new(move |id: &str| allowed.contains(id)));
        }
        aggregator
    }

    pub fn with_filter(mut self, filter: ServiceFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_limiter(mut self, limiter: ResultLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// `None` waits indefinitely.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    fn allowed(&self, service_id: &str) -> bool {
        self.filter.as_ref().map_or(true, |f| f(service_id))
    }

    /// Tools from every running, allowed service.
    ///
    /// A service whose listing fails contributes nothing.
    pub async fn get_all_tools(&self) -> Vec<AggregatedTool> {
        let adapters: Vec<_> = self
            .registry
            .running()
            .await
            .into_iter()
            .filter(|a| self.allowed(a.id()))
            .collect();

        let listings = join_all(adapters.iter().map(|a| a.list_tools())).await;

        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for (adapter, listing) in adapters.iter().zip(listings) {
            let tools = match listing {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(service = %adapter.id(), error = %e, "Skipping service in tool listing");
                    continue;
                }
            };
            for tool in tools {
                if !seen.insert(tool.name.clone()) {
                    warn!(
                        tool = %tool.name,
                        service = %adapter.id(),
                        "Duplicate tool name; calls go to the first service exposing it"
                    );
                }
                all.push(AggregatedTool {
                    tool,
                    service_id: adapter.id().to_string(),
                    service_name: adapter.name().to_string(),
                });
            }
        }
        all
    }

    /// First tool with this name.
    pub async fn find_tool(&self, name: &str) -> Option<AggregatedTool> {
        self.get_all_tools()
            .await
            .into_iter()
            .find(|t| t.tool.name == name)
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.find_tool(name).await.is_some()
    }

    /// Route a call to the owning service.
    ///
    /// Only `ToolNotFound` and `ToolCallFailed` come back as `Err`; every
    /// other failure is an error-flagged result.
    pub async fn call_tool(&self, request: CallToolRequest) -> BridgeResult<CallToolResult> {
        let owner = self
            .find_tool(&request.name)
            .await
            .ok_or_else(|| BridgeError::ToolNotFound(request.name.clone()))?;

        let adapter = self.registry.get(&owner.service_id).await.map_err(|_| {
            BridgeError::ToolCallFailed(format!("service '{}' is gone", owner.service_id))
        })?;
        if !adapter.is_running() {
            return Err(BridgeError::ToolCallFailed(format!(
                "service '{}' is not running",
                owner.service_id
            )));
        }

        debug!(tool = %request.name, service = %owner.service_id, "Routing tool call");
        let call = adapter.call_tool(&request.name, request.arguments);
        let outcome = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(tool = %request.name, service = %owner.service_id, "Tool call timed out");
                    return Ok(CallToolResult::error(format!(
                        "Tool '{}' timed out after {}s",
                        request.name,
                        limit.as_secs_f64()
                    )));
                }
            },
            None => call.await,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => return Ok(CallToolResult::error(e.to_string())),
        };
        match self.limiter.limit(result) {
            Ok(result) => Ok(result),
            Err(e) => Ok(CallToolResult::error(e.to_string())),
        }
    }

    /// Sorted, de-duplicated tool names joined by newlines.
    pub async fn get_tool_fingerprint(&self) -> String {
        let names: BTreeSet<String> = self
            .get_all_tools()
            .await
            .into_iter()
            .map(|t| t.tool.name)
            .collect();
        names.into_iter().collect::<Vec<_>>().join("\n")
    }

    /// Compare against the last snapshot and store the new one.
    pub async fn snapshot_and_check_changed(&self) -> bool {
        let current = self.get_tool_fingerprint().await;
        let mut last = self.last_fingerprint.lock();
        if *last == current {
            return false;
        }
        info!(
            before = fingerprint_len(&last),
            after = fingerprint_len(&current),
            "Tool set changed"
        );
        *last = current;
        true
    }
}

fn fingerprint_len(fingerprint: &str) -> usize {
    if fingerprint.is_empty() {
        0
    } else {
        fingerprint.split('\n').count()
    }
}
