//! Maps request failures to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::error;

use crate::bridge::BridgeError;
use crate::metrics;

/// Everything a request can fail with
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Caller address is not in the allow list
    #[error("Access denied")]
    Forbidden,

    /// Malformed request body or query string
    #[error("{0}")]
    BadRequest(String),

    /// POST body is not JSON
    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Bridge(err) => match err {
                BridgeError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
                BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
                BridgeError::AccessDenied(_) => StatusCode::FORBIDDEN,
                BridgeError::ExecutionFailure { .. }
                | BridgeError::Timeout { .. }
                | BridgeError::InternalFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Metrics label for this failure
    fn outcome(&self) -> &'static str {
        match self {
            ApiError::Forbidden => "denied",
            _ if self.status_code().is_server_error() => "error",
            _ => "rejected",
        }
    }
}

/// Successful script run
pub fn success(message: String) -> Response {
    metrics::REQUESTS_TOTAL.with_label_values(&["success"]).inc();
    (
        StatusCode::OK,
        Json(json!({ "status": "success", "message": message })),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::REQUESTS_TOTAL
            .with_label_values(&[self.outcome()])
            .inc();

        let status = self.status_code();
        let body = if status.is_server_error() {
            if let ApiError::Bridge(BridgeError::InternalFault(fault)) = &self {
                error!("Error executing script: {}", fault);
            }
            json!({ "status": "error", "message": self.to_string() })
        } else {
            json!({ "error": self.to_string() })
        };

        (status, Json(body)).into_response()
    }
}
