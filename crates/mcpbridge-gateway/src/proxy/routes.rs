use super::{jsonrpc_error_response, ProxyState, SESSION_HEADER};
use crate::handler::{METHOD_INITIALIZE, METHOD_INITIALIZED};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::ALLOW, HeaderMap, HeaderName, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use mcpbridge_core::{error_codes, JsonRpcMessage};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Pending events per legacy stream before new ones are dropped.
const LEGACY_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub(super) struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn session_not_found() -> Response {
    jsonrpc_error_response(
        StatusCode::NOT_FOUND,
        error_codes::SERVER_ERROR,
        "Session not found",
    )
}

pub(super) async fn get_handler(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
) -> Response {
    if let Some(sid) = session_header(&headers) {
        if state.sessions.has_streamable(sid) {
            return (StatusCode::METHOD_NOT_ALLOWED, [(ALLOW, "POST, DELETE")]).into_response();
        }
        return session_not_found();
    }
    open_legacy_stream(&state).into_response()
}

fn open_legacy_stream(
    state: &Arc<ProxyState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Event>(LEGACY_BUFFER);
    let id = state.sessions.open_legacy(tx.clone());

    let endpoint = format!("{}?sessionId={id}", state.path);
    // Fresh channel, cannot be full.
    let _ = tx.try_send(Event::default().event("endpoint").data(endpoint));

    let sessions = state.sessions.clone();
    let period = state.ping_interval;
    let mut closing = state.closing.subscribe();
    tokio::spawn(async move {
        let mut ticker = (!period.is_zero())
            .then(|| tokio::time::interval_at(tokio::time::Instant::now() + period, period));
        loop {
            let tick = async {
                match ticker.as_mut() {
                    Some(t) => {
                        t.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = tick => {
                    if !sessions.has_legacy(&id) {
                        break;
                    }
                    if tx.send(Event::default().event("ping").data("{}")).await.is_err() {
                        sessions.close_legacy(&id);
                        break;
                    }
                }
                _ = closing.changed() => break,
            }
        }
        debug!(session = %id, "Legacy SSE stream finished");
    });

    Sse::new(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
}

/// Decode a POST body into a single JSON-RPC message.
fn parse_message(body: &[u8]) -> Result<JsonRpcMessage, Response> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        jsonrpc_error_response(
            StatusCode::BAD_REQUEST,
            error_codes::PARSE_ERROR,
            &format!("Parse error: {e}"),
        )
    })?;
    if value.is_array() {
        return Err(jsonrpc_error_response(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_REQUEST,
            "Batch requests are not supported",
        ));
    }
    serde_json::from_value(value).map_err(|e| {
        jsonrpc_error_response(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_REQUEST,
            &format!("Invalid request: {e}"),
        )
    })
}

pub(super) async fn post_handler(
    State(state): State<Arc<ProxyState>>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let msg = match parse_message(&body) {
        Ok(msg) => msg,
        Err(resp) => return resp,
    };
    match query.session_id {
        Some(sid) => legacy_post(&state, &sid, msg),
        None => streamable_post(&state, &headers, msg).await,
    }
}

fn legacy_post(state: &Arc<ProxyState>, sid: &str, msg: JsonRpcMessage) -> Response {
    let Some(tx) = state.sessions.legacy_sender(sid) else {
        return session_not_found();
    };

    let handler = state.handler.clone();
    let sid = sid.to_string();
    tokio::spawn(async move {
        let Some(resp) = handler.handle(msg).await else {
            return;
        };
        match Event::default().event("message").json_data(&resp) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    debug!(session = %sid, "Legacy SSE client gone before response");
                }
            }
            Err(e) => tracing::warn!(session = %sid, error = %e, "Failed to encode response"),
        }
    });

    (StatusCode::ACCEPTED, "Accepted").into_response()
}

async fn streamable_post(state: &ProxyState, headers: &HeaderMap, msg: JsonRpcMessage) -> Response {
    let session = match session_header(headers) {
        Some(sid) if state.sessions.has_streamable(sid) => sid.to_string(),
        Some(_) => return session_not_found(),
        None if msg.is_request() && msg.method_name() == METHOD_INITIALIZE => {
            state.sessions.open_streamable()
        }
        None => {
            return jsonrpc_error_response(
                StatusCode::BAD_REQUEST,
                error_codes::SERVER_ERROR,
                "Bad Request: no valid session id; send initialize first",
            )
        }
    };
    if msg.is_notification() && msg.method_name() == METHOD_INITIALIZED {
        state.sessions.mark_streamable_initialized(&session);
    }
    let session_header = [(HeaderName::from_static(SESSION_HEADER), session)];

    match state.handler.handle(msg).await {
        Some(resp) => (StatusCode::OK, session_header, Json(resp)).into_response(),
        None => (StatusCode::ACCEPTED, session_header).into_response(),
    }
}

pub(super) async fn delete_handler(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
) -> Response {
    match session_header(&headers) {
        Some(sid) if state.sessions.close_streamable(sid) => StatusCode::NO_CONTENT.into_response(),
        _ => session_not_found(),
    }
}
