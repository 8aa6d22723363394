use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::RelayError;

/// A [`RelayError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self.0 {
            RelayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RelayError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
