#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Inbound proxy served on a real socket, exercised over HTTP.

use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use mcpbridge_core::{error_codes, ProxyConfig};
use mcpbridge_gateway::{McpHandler, McpProxy};
use mcpbridge_services::{ModuleCatalog, ServiceRegistry, ToolAggregator};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    base: String,
    proxy: Arc<McpProxy>,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

/// Helper: serve a proxy over an empty registry on a random port.
async fn start_test_server(config: ProxyConfig) -> TestServer {
    let registry = Arc::new(ServiceRegistry::new(ModuleCatalog::new()));
    let handler = Arc::new(McpHandler::new(Arc::new(ToolAggregator::new(registry))));
    let proxy = Arc::new(McpProxy::new(handler, &config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel::<()>();

    let server = proxy.clone();
    let task = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    TestServer {
        base,
        proxy,
        shutdown: Some(tx),
        task,
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Minimal reader of `text/event-stream` frames.
struct EventReader {
    stream: ByteStream,
    buf: String,
}

impl EventReader {
    /// Next `(event, data)` pair.
    async fn next_event(&mut self) -> (String, String) {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let frame: String = self.buf.drain(..end + 2).collect();
                let mut event = String::from("message");
                let mut data = Vec::new();
                for line in frame.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        event = v.trim().to_string();
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data.push(v.trim_start().to_string());
                    }
                }
                if data.is_empty() {
                    continue;
                }
                return (event, data.join("\n"));
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("no SSE data")
                .expect("SSE stream ended")
                .unwrap();
            self.buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Skip pings until an event named `name` arrives.
    async fn expect(&mut self, name: &str) -> String {
        loop {
            let (event, data) = self.next_event().await;
            if event == name {
                return data;
            }
        }
    }
}

async fn open_legacy(client: &reqwest::Client, base: &str) -> (String, EventReader) {
    let resp = client.get(format!("{base}/mcp")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let mut reader = EventReader {
        stream: Box::pin(resp.bytes_stream()),
        buf: String::new(),
    };
    let endpoint = reader.expect("endpoint").await;
    assert!(endpoint.starts_with("/mcp?sessionId="));
    (endpoint, reader)
}

#[tokio::test]
async fn test_legacy_sse_round_trip() {
    let server = start_test_server(ProxyConfig::default()).await;
    let client = reqwest::Client::new();
    let (endpoint, mut events) = open_legacy(&client, &server.base).await;
    assert_eq!(server.proxy.sessions().legacy_count(), 1);

    let resp = client
        .post(format!("{}{endpoint}", server.base))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    assert_eq!(resp.text().await.unwrap(), "Accepted");

    let data: Value = serde_json::from_str(&events.expect("message").await).unwrap();
    assert_eq!(data["id"], 1);
    assert_eq!(data["result"]["serverInfo"]["name"], "mcpbridge");

    let resp = client
        .post(format!("{}{endpoint}", server.base))
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let data: Value = serde_json::from_str(&events.expect("message").await).unwrap();
    assert_eq!(data["id"], 2);
    assert_eq!(data["result"]["tools"], json!([]));

    assert_eq!(server.proxy.broadcast_tools_changed(), 1);
    let data: Value = serde_json::from_str(&events.expect("message").await).unwrap();
    assert_eq!(data["method"], "notifications/tools/list_changed");
}

#[tokio::test]
async fn test_legacy_post_to_unknown_session() {
    let server = start_test_server(ProxyConfig::default()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/mcp?sessionId=missing", server.base))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], error_codes::SERVER_ERROR);
}

#[tokio::test]
async fn test_streamable_session_over_http() {
    let server = start_test_server(ProxyConfig::default()).await;
    let client = reqwest::Client::new();
    let url = format!("{}/mcp", server.base);

    let resp = client
        .post(&url)
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let sid = resp.headers()["mcp-session-id"].to_str().unwrap().to_string();

    let resp = client
        .post(&url)
        .header("mcp-session-id", &sid)
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["mcp-session-id"], sid.as_str());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], 2);

    let resp = client
        .get(&url)
        .header("mcp-session-id", &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);

    let resp = client
        .delete(&url)
        .header("mcp-session-id", &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .post(&url)
        .header("mcp-session-id", &sid)
        .json(&json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_shutdown_closes_open_streams() {
    let mut server = start_test_server(ProxyConfig::default()).await;
    let client = reqwest::Client::new();
    let (_endpoint, mut events) = open_legacy(&client, &server.base).await;

    server.shutdown.take().unwrap().send(()).unwrap();

    // The stream ends instead of hanging.
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = events.stream.next().await {
            if chunk.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok());
    drop(events);

    tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.proxy.sessions().legacy_count(), 0);
}
