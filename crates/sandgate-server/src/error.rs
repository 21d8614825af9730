//! HTTP error responses.
//!
//! Every failure is rendered as `{"code": ..., "message": ...}` with the
//! status code matching the error kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sandgate_core::CoreError;
use serde::{Deserialize, Serialize};

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `SANDBOX_NOT_FOUND`.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    /// Build an error with an explicit status and code.
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    /// Malformed path, query or body.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_REQUEST", message)
    }

    /// Status code of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Code of this error.
    pub fn code(&self) -> &str {
        &self.body.code
    }
}

/// HTTP status for a core error code.
fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::MissingApiKey => StatusCode::UNAUTHORIZED,
        CoreError::SandboxNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
        CoreError::Provisioning(_) | CoreError::Backend(_) => StatusCode::BAD_GATEWAY,
        CoreError::ReadinessTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CoreError::Ingress(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(code = err.code(), error = %err, "Request failed");
        } else {
            tracing::debug!(code = err.code(), error = %err, "Request rejected");
        }
        Self::new(status, err.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
