use crate::protocol::error_codes;
use thiserror::Error;

/// A convenience `Result` alias using [`BridgeError`].
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Top-level error type for the gateway.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A service or gateway configuration failed validation.
    #[error("Invalid config: {0}")]
    ConfigInvalid(String),

    /// No service is registered under the given id.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The service is already running (or the id is already taken).
    #[error("Service already running: {0}")]
    ServiceAlreadyRunning(String),

    /// The operation needs a running service.
    #[error("Service not running: {0}")]
    ServiceNotRunning(String),

    /// The backend could not be brought up.
    #[error("Service '{id}' failed to initialize: {reason}")]
    ServiceInitializationFailed {
        /// Service id.
        id: String,
        /// Root cause reported by the backend.
        reason: String,
    },

    /// The backend could not be torn down.
    #[error("Service '{id}' failed to stop: {reason}")]
    ServiceStopFailed {
        /// Service id.
        id: String,
        /// Root cause reported by the backend.
        reason: String,
    },

    /// No running service exposes a tool with this name.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The owning service could not serve the call.
    #[error("Tool call failed: {0}")]
    ToolCallFailed(String),

    /// The tool result cannot be bounded to the configured size.
    #[error("Tool result too large: {0}")]
    ToolResultTooLarge(String),

    /// A transport-level connection could not be established or was lost.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer sent something that violates JSON-RPC / MCP.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// JSON-RPC error code used when this error has to be reported to a peer.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            Self::Json(_) | Self::Protocol(_) => error_codes::PARSE_ERROR,
            Self::ConfigInvalid(_) => error_codes::INVALID_PARAMS,
            Self::Internal(_) | Self::Io(_) => error_codes::INTERNAL_ERROR,
            _ => error_codes::SERVER_ERROR,
        }
    }

    /// Whether this error is one of the "unknown id" failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ServiceNotFound(_) | Self::ToolNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_root_cause() {
        let err = BridgeError::ServiceInitializationFailed {
            id: "fs".into(),
            reason: "spawn failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Service 'fs' failed to initialize: spawn failed"
        );
    }

    #[test]
    fn test_json_rpc_codes() {
        assert_eq!(
            BridgeError::Protocol("bad".into()).json_rpc_code(),
            error_codes::PARSE_ERROR
        );
        assert_eq!(
            BridgeError::Internal("x".into()).json_rpc_code(),
            error_codes::INTERNAL_ERROR
        );
        assert_eq!(
            BridgeError::ToolNotFound("x".into()).json_rpc_code(),
            error_codes::SERVER_ERROR
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(BridgeError::ServiceNotFound("a".into()).is_not_found());
        assert!(BridgeError::ToolNotFound("t".into()).is_not_found());
        assert!(!BridgeError::ServiceNotRunning("a".into()).is_not_found());
    }
}
