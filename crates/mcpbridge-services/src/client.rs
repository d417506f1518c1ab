//! Stdio MCP client. Spawns an MCP server as a subprocess and exchanges
//! newline-delimited JSON-RPC 2.0 messages over its stdin/stdout.

use crate::rpc::{await_response, McpChannel, PendingRequests};
use async_trait::async_trait;
use mcpbridge_core::{
    BridgeError, BridgeResult, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, StdioConfig,
};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// MCP client that communicates with an MCP server over stdio.
pub struct StdioClient {
    stdin: Arc<Mutex<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: Arc<PendingRequests>,
    reader: JoinHandle<()>,
    command: String,
}

impl StdioClient {
    /// Spawn the server process. Only spawns; the handshake is separate.
    ///
    /// The raw `io::Error` is returned so callers can turn common spawn
    /// failures into actionable messages.
    pub fn spawn(config: &StdioConfig) -> std::io::Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "MCP server stdin not available")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "MCP server stdout not available")
        })?;

        if let Some(stderr) = child.stderr.take() {
            let command = config.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %command, line = %line, "MCP server stderr");
                }
            });
        }

        let stdin = Arc::new(Mutex::new(stdin));
        let pending = Arc::new(PendingRequests::new());

        // Reader task: route responses, answer server-initiated requests.
        let reader = {
            let pending = pending.clone();
            let stdin = stdin.clone();
            let command = config.command.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => {
                            debug!(server = %command, "MCP server stdout closed");
                            break;
                        }
                        Ok(_) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                                Ok(msg) if msg.is_response() => {
                                    if !pending.resolve(msg.into_response()) {
                                        debug!(server = %command, "Response for unknown request id");
                                    }
                                }
                                Ok(msg) if msg.is_request() => {
                                    let reply = answer_server_request(&msg);
                                    if let Err(e) = write_message(&stdin, &reply).await {
                                        debug!(server = %command, error = %e, "Failed to answer server request");
                                    }
                                }
                                Ok(msg) => {
                                    debug!(server = %command, method = %msg.method_name(), "MCP server notification");
                                }
                                Err(e) => {
                                    debug!(line = %trimmed, error = %e, "Non-JSON-RPC line from MCP server");
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Error reading MCP server stdout");
                            break;
                        }
                    }
                }
                pending.fail_all();
            })
        };

        Ok(Self {
            stdin,
            child: Mutex::new(Some(child)),
            pending,
            reader,
            command: config.command.clone(),
        })
    }

    /// The command this client was spawned from.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Kill the subprocess and stop the reader.
    pub async fn shutdown(&self) -> BridgeResult<()> {
        self.reader.abort();
        self.pending.fail_all();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            child.kill().await.map_err(|e| {
                BridgeError::Internal(format!("Failed to kill '{}': {e}", self.command))
            })?;
        }
        Ok(())
    }
}

/// Servers may ping their client; everything else is unsupported here.
fn answer_server_request(msg: &JsonRpcMessage) -> serde_json::Value {
    let resp = match msg.method_name() {
        "ping" => JsonRpcResponse::success(msg.id.clone(), serde_json::json!({})),
        other => JsonRpcResponse::method_not_found(msg.id.clone(), other),
    };
    serde_json::to_value(resp).unwrap_or_default()
}

async fn write_message(
    stdin: &Mutex<ChildStdin>,
    msg: &impl serde::Serialize,
) -> BridgeResult<()> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');

    let mut stdin = stdin.lock().await;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| BridgeError::ConnectionFailed(format!("Failed to write to MCP stdin: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| BridgeError::ConnectionFailed(format!("Failed to flush MCP stdin: {e}")))?;
    Ok(())
}

#[async_trait]
impl McpChannel for StdioClient {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> BridgeResult<serde_json::Value> {
        let (id, rx) = self.pending.register();
        let req = JsonRpcRequest::new(id.clone(), method, params);

        if let Err(e) = write_message(&self.stdin, &req).await {
            self.pending.cancel(&id);
            return Err(e);
        }

        await_response(rx, method).await
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> BridgeResult<()> {
        write_message(&self.stdin, &JsonRpcNotification::new(method, params)).await
    }

    async fn close(&self) -> BridgeResult<()> {
        self.shutdown().await
    }
}

impl Drop for StdioClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rpc;
    use std::collections::HashMap;

    fn shell(script: &str) -> StdioConfig {
        StdioConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_command_reports_not_found() {
        let config = StdioConfig {
            command: "/nonexistent/mcp-server".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
        };
        let err = StdioClient::spawn(&config).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_request_fails_when_server_exits() {
        let client = StdioClient::spawn(&shell("exit 0")).unwrap();
        let err = client.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_request_round_trip_with_scripted_server() {
        // Reads one request line and answers id 1 with a single tool.
        let script = r#"read line; echo '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"echo"}]}}'; sleep 1"#;
        let client = StdioClient::spawn(&shell(script)).unwrap();
        let tools = rpc::list_all_tools(&client).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        client.shutdown().await.unwrap();
    }
}
