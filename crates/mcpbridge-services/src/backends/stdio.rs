use super::{ClientSlot, ServiceBackend};
use crate::client::StdioClient;
use crate::rpc::{self, McpChannel};
use async_trait::async_trait;
use mcpbridge_core::{
    BridgeError, BridgeResult, CallToolRequest, CallToolResult, InitializeResult, StdioConfig,
    Tool, TransportKind,
};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Spawn plus handshake must finish within this window.
pub const STDIO_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Subprocess backend.
pub struct StdioBackend {
    config: StdioConfig,
    connect_timeout: Duration,
    client: ClientSlot<StdioClient>,
}

impl StdioBackend {
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            connect_timeout: STDIO_CONNECT_TIMEOUT,
            client: ClientSlot::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl ServiceBackend for StdioBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&self) -> BridgeResult<InitializeResult> {
        let client = StdioClient::spawn(&self.config).map_err(|e| {
            BridgeError::ConnectionFailed(spawn_error_hint(&self.config.command, &e))
        })?;
        let client = Arc::new(client);

        match tokio::time::timeout(self.connect_timeout, rpc::handshake(client.as_ref())).await {
            Ok(Ok(init)) => {
                self.client.set(client).await;
                Ok(init)
            }
            Ok(Err(e)) => {
                if let Err(kill_err) = client.shutdown().await {
                    warn!(error = %kill_err, "Failed to clean up after handshake error");
                }
                Err(e)
            }
            Err(_) => {
                if let Err(kill_err) = client.shutdown().await {
                    warn!(error = %kill_err, "Failed to clean up after handshake timeout");
                }
                Err(BridgeError::ConnectionFailed(format!(
                    "'{}' did not complete the MCP handshake within {}s",
                    self.config.command,
                    self.connect_timeout.as_secs()
                )))
            }
        }
    }

    async fn fetch_tools(&self) -> BridgeResult<Vec<Tool>> {
        let client = self.client.get().await?;
        rpc::list_all_tools(client.as_ref()).await
    }

    async fn call_tool(&self, request: CallToolRequest) -> BridgeResult<CallToolResult> {
        let client = self.client.get().await?;
        rpc::call_tool(client.as_ref(), &request).await
    }

    async fn disconnect(&self) -> BridgeResult<()> {
        match self.client.take().await {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }
}

/// Rewrite a spawn failure into a message that tells the user what to do.
pub fn spawn_error_hint(command: &str, err: &std::io::Error) -> String {
    match err.kind() {
        ErrorKind::NotFound => {
            let install = install_hint(command)
                .map(|h| format!(" {h}"))
                .unwrap_or_default();
            let path_hint = if cfg!(windows) {
                format!(
                    "Check that it is installed and on PATH; Node-based launchers may need their \
                     '.cmd' shim (e.g. '{command}.cmd')."
                )
            } else {
                "Check that it is installed and that its directory is on PATH \
                 (GUI-launched processes often see a shorter PATH than your shell)."
                    .to_string()
            };
            format!("Command '{command}' not found.{install} {path_hint}")
        }
        ErrorKind::PermissionDenied => {
            if cfg!(windows) {
                format!(
                    "Permission denied running '{command}'. Check that the file is not blocked \
                     and that your account may execute it."
                )
            } else {
                format!(
                    "Permission denied running '{command}'. Make it executable with \
                     `chmod +x {command}` or check the permissions of its directory."
                )
            }
        }
        _ => format!("Failed to spawn '{command}': {err}"),
    }
}

/// Install suggestion for well-known launchers.
fn install_hint(command: &str) -> Option<String> {
    let program = Path::new(command)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(command);

    let hint = match program {
        "npx" | "node" | "npm" => {
            if cfg!(target_os = "macos") {
                "Install Node.js (e.g. `brew install node`)."
            } else if cfg!(windows) {
                "Install Node.js from https://nodejs.org (or `winget install OpenJS.NodeJS`)."
            } else {
                "Install Node.js with your package manager (e.g. `apt install nodejs npm`)."
            }
        }
        "uvx" | "uv" => {
            if cfg!(windows) {
                "Install uv (`winget install astral-sh.uv`)."
            } else {
                "Install uv (`curl -LsSf https://astral.sh/uv/install.sh | sh`)."
            }
        }
        "python" | "python3" => "Install Python 3 and make sure it is on PATH.",
        "docker" => "Install Docker and make sure the daemon is running.",
        _ => return None,
    };
    Some(hint.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_not_found_hint_names_command() {
        let err = std::io::Error::from(ErrorKind::NotFound);
        let msg = spawn_error_hint("npx", &err);
        assert!(msg.contains("Command 'npx' not found"));
        assert!(msg.contains("Node.js"));
    }

    #[test]
    fn test_permission_hint() {
        let err = std::io::Error::from(ErrorKind::PermissionDenied);
        let msg = spawn_error_hint("./server.sh", &err);
        assert!(msg.contains("Permission denied"));
    }

    #[test]
    fn test_other_errors_keep_cause() {
        let err = std::io::Error::new(ErrorKind::Other, "resource busy");
        let msg = spawn_error_hint("srv", &err);
        assert!(msg.contains("resource busy"));
    }

    #[test]
    fn test_unknown_launcher_has_no_install_hint() {
        assert!(install_hint("/opt/bin/my-server").is_none());
        assert!(install_hint("/usr/local/bin/uvx").is_some());
    }

    #[tokio::test]
    async fn test_connect_missing_binary_is_connection_failure() {
        let backend = StdioBackend::new(StdioConfig {
            command: "/nonexistent/mcp-server".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
        });
        let err = backend.connect().await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionFailed(_)));
        assert!(err.to_string().contains("not found"));
        // Never connected: teardown is a no-op.
        backend.disconnect().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_times_out_on_silent_server() {
        let backend = StdioBackend::new(StdioConfig {
            command: "sh".into(),
            args: vec!["-c".into(), "sleep 30".into()],
            env: HashMap::new(),
            cwd: None,
        })
        .with_connect_timeout(Duration::from_millis(200));
        let err = backend.connect().await.unwrap_err();
        assert!(err.to_string().contains("handshake"));
    }
}
