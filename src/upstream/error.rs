//! Upstream failures and their HTTP mapping.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::upstream::client::UpstreamResponse;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The backend's breaker refused the call; nothing was sent.
    #[error("circuit for {backend} is open")]
    CircuitOpen { backend: String },

    #[error("{backend} did not answer within {timeout:?}")]
    Timeout { backend: String, timeout: Duration },

    #[error("transport error talking to {backend}: {message}")]
    Transport { backend: String, message: String },

    /// The backend answered with a server error. The response is kept so it
    /// can be relayed to the caller unchanged.
    #[error("{backend} answered {}", response.status)]
    Status {
        backend: String,
        response: UpstreamResponse,
    },

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UpstreamError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            UpstreamError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Transport { .. } => StatusCode::BAD_GATEWAY,
            UpstreamError::Status { response, .. } => response.status,
            UpstreamError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, UpstreamError::CircuitOpen { .. })
    }
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            UpstreamError::Status { response, .. } => response.into_response(),
            UpstreamError::CircuitOpen { ref backend } => {
                let body = json!({
                    "error": "circuit_open",
                    "backend": backend,
                    "message": self.to_string(),
                });
                (status, Json(body)).into_response()
            }
            other => {
                let body = json!({ "error": other.to_string() });
                (status, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_failures_to_gateway_statuses() {
        let open = UpstreamError::CircuitOpen { backend: "legacy".into() };
        assert_eq!(open.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(open.is_circuit_open());

        let timeout = UpstreamError::Timeout {
            backend: "legacy".into(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let transport = UpstreamError::Transport {
            backend: "legacy".into(),
            message: "refused".into(),
        };
        assert_eq!(transport.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn server_error_passes_through() {
        let err = UpstreamError::Status {
            backend: "modern".into(),
            response: UpstreamResponse {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                headers: Default::default(),
                body: "boom".into(),
            },
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
