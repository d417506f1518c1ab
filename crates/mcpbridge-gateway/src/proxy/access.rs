use super::jsonrpc_error_response;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use mcpbridge_core::{error_codes, BridgeResult, ProxyConfig};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Access settings the proxy enforces on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessSettings {
    pub enabled: bool,
    /// Required `Authorization: Bearer` token, if any.
    pub bearer_token: Option<String>,
}

impl From<&ProxyConfig> for AccessSettings {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            enabled: config.enabled,
            bearer_token: config.bearer_token.clone().filter(|t| !t.is_empty()),
        }
    }
}

/// Where access settings come from. Read on every request.
#[async_trait]
pub trait AccessSource: Send + Sync {
    async fn load(&self) -> BridgeResult<AccessSettings>;
}

/// Fixed settings, typically taken from the config file.
#[derive(Debug, Clone)]
pub struct StaticAccess(pub AccessSettings);

#[async_trait]
impl AccessSource for StaticAccess {
    async fn load(&self) -> BridgeResult<AccessSettings> {
        Ok(self.0.clone())
    }
}

fn bearer(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Access middleware: proxy switch first, then the bearer token.
///
/// If the settings cannot be loaded the request is let through.
pub async fn access_middleware(
    State(source): State<Arc<dyn AccessSource>>,
    request: Request,
    next: Next,
) -> Response {
    let settings = match source.load().await {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "Access settings unavailable; allowing request");
            return next.run(request).await;
        }
    };

    if !settings.enabled {
        return jsonrpc_error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVER_ERROR,
            "MCP proxy is disabled",
        );
    }

    if let Some(expected) = settings.bearer_token.as_deref() {
        match bearer(&request) {
            Some(presented) if token_matches(presented, expected) => {}
            Some(_) => {
                warn!("Rejected proxy request: invalid bearer token");
                return jsonrpc_error_response(
                    StatusCode::UNAUTHORIZED,
                    error_codes::SERVER_ERROR,
                    "Invalid bearer token",
                );
            }
            None => {
                warn!("Rejected proxy request: missing bearer token");
                return jsonrpc_error_response(
                    StatusCode::UNAUTHORIZED,
                    error_codes::SERVER_ERROR,
                    "Bearer token required",
                );
            }
        }
    }

    next.run(request).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_compare() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", "secreT"));
        assert!(!token_matches("sec", "secret"));
    }

    #[test]
    fn test_settings_from_config_ignore_empty_token() {
        let config = ProxyConfig {
            bearer_token: Some(String::new()),
            ..ProxyConfig::default()
        };
        let settings = AccessSettings::from(&config);
        assert!(settings.enabled);
        assert!(settings.bearer_token.is_none());
    }
}
