//! Route handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use sessionbus_core::{Headers, OutboundEnvelope, SessionRecord};
use tracing::debug;

use super::{ApiError, AppState};
use crate::error::RelayError;
use crate::relay::InboundRequest;

/// Body of `GET /poll` when nothing arrived within the hold window.
pub const EMPTY_POLL: &str = "[]";

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WaitQuery {
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

/// JSON body, or `null` for an empty one.
fn json_or_null(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| RelayError::MalformedPayload(e.to_string()).into())
}

fn to_headers(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    out
}

/// `POST /sessions`: handshake. Creates the session, its worker and its
/// mailbox.
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let metadata = json_or_null(&body)?;
    let session_id = state.relay.register_session(metadata).await?;
    state.workers.ensure(&session_id).await?;
    state.mailboxes.ensure(&session_id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "sessionId": session_id }))))
}

/// `GET /sessions/{id}`
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    match state.relay.session(&id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(RelayError::SessionNotFound(id).into()),
    }
}

/// `POST /sessions/{id}/requests`: enqueue without waiting.
pub async fn enqueue_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<InboundRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request_id = state
        .relay
        .enqueue_inbound(
            &id,
            &request.method,
            &request.url,
            request.headers,
            request.body,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "requestId": request_id }))))
}

/// `GET /sessions/{id}/responses/{rid}?timeoutMs=`
pub async fn await_response(
    State(state): State<AppState>,
    Path((id, rid)): Path<(String, String)>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<OutboundEnvelope>, ApiError> {
    let timeout = query
        .timeout_ms
        .map_or(state.relay.await_timeout(), std::time::Duration::from_millis)
        .min(state.max_wait);
    let envelope = state.relay.await_outbound(&id, &rid, timeout).await?;
    Ok(Json(envelope))
}

/// `POST /sessions/{id}/responses/{rid}`
pub async fn publish_response(
    State(state): State<AppState>,
    Path((id, rid)): Path<(String, String)>,
    Json(envelope): Json<OutboundEnvelope>,
) -> Result<StatusCode, ApiError> {
    let delivered = state
        .relay
        .publish_outbound(&id, &rid, envelope.status, envelope.body)
        .await?;
    debug!(session_id = %id, request_id = %rid, delivered, "Response published");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /message?sessionId=`: one protocol message, answered inline.
pub async fn message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let sid = query.session_id;
    let body = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
    state.workers.ensure(&sid).await?;
    state.mailboxes.ensure(&sid).await?;

    let request = InboundRequest {
        method: "POST".to_string(),
        url: uri.path().to_string(),
        headers: to_headers(&headers),
        body,
    };
    let response = state
        .relay
        .dispatch(&sid, request, state.relay.await_timeout())
        .await?;
    Ok(envelope_response(&response))
}

fn envelope_response(envelope: &OutboundEnvelope) -> Response {
    let status = StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::BAD_GATEWAY);
    if envelope.is_empty() {
        return status.into_response();
    }
    let content_type = if envelope.payload().is_structured() {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    };
    (status, [(CONTENT_TYPE, content_type)], envelope.body.clone()).into_response()
}

/// `GET /poll?sessionId=`: the oldest queued server-initiated event, held
/// open for up to `poll_hold` when the mailbox is empty.
pub async fn poll(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    let body = match state
        .mailboxes
        .next(&query.session_id, state.poll_hold)
        .await?
    {
        Some(envelope) => serde_json::to_string(&envelope)
            .map_err(|e| RelayError::MalformedPayload(e.to_string()))?,
        None => EMPTY_POLL.to_string(),
    };
    Ok((StatusCode::OK, [(CONTENT_TYPE, "application/json")], body).into_response())
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}
