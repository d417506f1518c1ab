//! MCP client over the legacy HTTP+SSE transport: a long-lived GET stream
//! delivers an `endpoint` event and then every response; requests are POSTed
//! to that endpoint.

use crate::http_client::header_map;
use crate::rpc::{await_response, McpChannel, PendingRequests};
use crate::sse::SseDecoder;
use async_trait::async_trait;
use futures_util::StreamExt;
use mcpbridge_core::{
    BridgeError, BridgeResult, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, SseConfig,
};
use reqwest::header::ACCEPT;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for the server's `endpoint` event.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SseClient {
    http: reqwest::Client,
    post_url: reqwest::Url,
    pending: Arc<PendingRequests>,
    reader: JoinHandle<()>,
}

impl SseClient {
    /// Open the event stream and wait for the POST endpoint.
    pub async fn connect(config: &SseConfig) -> BridgeResult<Self> {
        let base = reqwest::Url::parse(&config.url)
            .map_err(|e| BridgeError::ConfigInvalid(format!("invalid url '{}': {e}", config.url)))?;
        let http = reqwest::Client::builder()
            .default_headers(header_map(&config.headers)?)
            .build()
            .map_err(|e| BridgeError::Internal(format!("Failed to build HTTP client: {e}")))?;

        let resp = http
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(format!("SSE connect to {base}: {e}")))?;
        if !resp.status().is_success() {
            return Err(BridgeError::ConnectionFailed(format!(
                "SSE connect to {base}: HTTP {}",
                resp.status()
            )));
        }

        let pending = Arc::new(PendingRequests::new());
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader = {
            let pending = pending.clone();
            let mut stream = resp.bytes_stream();
            tokio::spawn(async move {
                let mut decoder = SseDecoder::new();
                let mut endpoint_tx = Some(endpoint_tx);
                while let Some(chunk) = stream.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(error = %e, "SSE stream error");
                            break;
                        }
                    };
                    for event in decoder.push(&chunk) {
                        match event.event.as_str() {
                            "endpoint" => {
                                if let Some(tx) = endpoint_tx.take() {
                                    let _ = tx.send(event.data);
                                }
                            }
                            "message" => match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                                Ok(msg) if msg.is_response() => {
                                    pending.resolve(msg.into_response());
                                }
                                Ok(msg) => {
                                    debug!(method = %msg.method_name(), "SSE server message ignored");
                                }
                                Err(e) => debug!(error = %e, "Non-JSON-RPC SSE message"),
                            },
                            other => debug!(event = %other, "SSE event ignored"),
                        }
                    }
                }
                debug!("SSE stream closed");
                pending.fail_all();
            })
        };

        let endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(BridgeError::ConnectionFailed(
                    "SSE stream closed before the endpoint event".into(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(BridgeError::ConnectionFailed(format!(
                    "no endpoint event within {}s",
                    ENDPOINT_TIMEOUT.as_secs()
                )));
            }
        };

        let post_url = base.join(endpoint.trim()).map_err(|e| {
            reader.abort();
            BridgeError::Protocol(format!("invalid endpoint '{endpoint}': {e}"))
        })?;
        debug!(endpoint = %post_url, "SSE endpoint received");

        Ok(Self {
            http,
            post_url,
            pending,
            reader,
        })
    }

    /// Where requests are POSTed.
    pub fn post_url(&self) -> &reqwest::Url {
        &self.post_url
    }

    async fn post(&self, body: &impl serde::Serialize) -> BridgeResult<()> {
        let resp = self
            .http
            .post(self.post_url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(format!("SSE post: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(BridgeError::ConnectionFailed(format!(
                "SSE post: HTTP {}",
                resp.status()
            )))
        }
    }
}

#[async_trait]
impl McpChannel for SseClient {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> BridgeResult<serde_json::Value> {
        let (id, rx) = self.pending.register();
        if let Err(e) = self.post(&JsonRpcRequest::new(id.clone(), method, params)).await {
            self.pending.cancel(&id);
            return Err(e);
        }
        await_response(rx, method).await
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> BridgeResult<()> {
        self.post(&JsonRpcNotification::new(method, params)).await
    }

    async fn close(&self) -> BridgeResult<()> {
        self.reader.abort();
        self.pending.fail_all();
        Ok(())
    }
}

impl Drop for SseClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
