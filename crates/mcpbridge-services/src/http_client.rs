use crate::rpc::{into_result, McpChannel};
use crate::sse::decode_all;
use async_trait::async_trait;
use mcpbridge_core::{
    BridgeError, BridgeResult, HttpConfig, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    RequestId, PROTOCOL_VERSION,
};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Session header used by the Streamable HTTP transport.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Build a header map from configured string pairs.
pub fn header_map(headers: &HashMap<String, String>) -> BridgeResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BridgeError::ConfigInvalid(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| BridgeError::ConfigInvalid(format!("invalid value for header '{name}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// MCP client over the Streamable HTTP transport.
pub struct HttpClient {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> BridgeResult<Self> {
        let endpoint = reqwest::Url::parse(&config.url)
            .map_err(|e| BridgeError::ConfigInvalid(format!("invalid url '{}': {e}", config.url)))?;

        let mut builder = reqwest::Client::builder()
            .default_headers(header_map(&config.headers)?)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let http = builder
            .build()
            .map_err(|e| BridgeError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
        })
    }

    /// Session id assigned by the server, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn post(&self, body: &impl serde::Serialize) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(self.endpoint.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header("mcp-protocol-version", PROTOCOL_VERSION)
            .json(body);
        if let Some(sid) = self.session_id() {
            req = req.header(SESSION_HEADER, sid);
        }
        req
    }
}

/// Pick the response to `id` out of a JSON or SSE body.
fn extract_response(
    content_type: &str,
    body: &str,
    id: &RequestId,
) -> BridgeResult<JsonRpcMessage> {
    if content_type.starts_with("text/event-stream") {
        for event in decode_all(body.as_bytes()) {
            if let Ok(msg) = serde_json::from_str::<JsonRpcMessage>(&event.data) {
                if msg.is_response() && msg.id.as_ref() == Some(id) {
                    return Ok(msg);
                }
            }
        }
        return Err(BridgeError::Protocol(
            "event stream ended without a response".into(),
        ));
    }

    serde_json::from_str(body)
        .map_err(|e| BridgeError::Protocol(format!("Failed to parse MCP HTTP response: {e}")))
}

#[async_trait]
impl McpChannel for HttpClient {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> BridgeResult<serde_json::Value> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let req = JsonRpcRequest::new(id.clone(), method, params);

        let resp = self
            .post(&req)
            .send()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(format!("{method}: {e}")))?;

        if let Some(sid) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|h| h.to_str().ok())
        {
            *self.session_id.lock() = Some(sid.to_string());
        }

        let status = resp.status();
        if status == StatusCode::ACCEPTED {
            return Err(BridgeError::Protocol(format!(
                "server returned 202 Accepted for request '{method}'"
            )));
        }
        if !status.is_success() {
            return Err(BridgeError::ConnectionFailed(format!(
                "MCP HTTP status {status} for '{method}'"
            )));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(format!("Failed to read body: {e}")))?;
        debug!(method = %method, content_type = %content_type, "MCP HTTP response");

        let msg = extract_response(&content_type, &body, &id)?;
        into_result(msg.into_response())
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> BridgeResult<()> {
        let resp = self
            .post(&JsonRpcNotification::new(method, params))
            .send()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(format!("{method}: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(BridgeError::ConnectionFailed(format!(
                "notification '{method}' failed: {}",
                resp.status()
            )))
        }
    }

    async fn close(&self) -> BridgeResult<()> {
        let Some(sid) = self.session_id.lock().take() else {
            return Ok(());
        };
        // Servers may not support explicit termination; 405 is fine.
        let resp = self
            .http
            .delete(self.endpoint.clone())
            .header(SESSION_HEADER, sid)
            .send()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(format!("session delete: {e}")))?;
        debug!(status = %resp.status(), "MCP HTTP session terminated");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_rejects_invalid_names() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            header_map(&headers),
            Err(BridgeError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_extract_response_from_sse_body() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                    event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":4,\"result\":{\"ok\":true}}\n\n";
        let msg = extract_response("text/event-stream", body, &RequestId::Number(4)).unwrap();
        assert_eq!(msg.result.unwrap()["ok"], true);
    }

    #[test]
    fn test_extract_response_from_json_body() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
        let msg = extract_response("application/json", body, &RequestId::Number(1)).unwrap();
        assert!(msg.is_response());
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let config = HttpConfig {
            url: "not a url".into(),
            headers: HashMap::new(),
            timeout_ms: None,
        };
        assert!(HttpClient::new(&config).is_err());
    }
}
