use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API-facing error with a stable HTTP mapping. The receiver policy from
/// the ingest contract rides on this: content problems never become 5xx;
/// only storage unavailability does.
#[derive(Debug)]
pub enum ApiError {
    /// Unknown org/source or missing org context
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    /// Legal-state violation (e.g. transition on a closed issue)
    Conflict(String),
    /// Storage is unavailable; the only 5xx the receiver produces
    Unavailable(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthorized => "unknown organization or source".to_string(),
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unavailable(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.message(), "request failed");
        }
        (status, Json(json!({"ok": false, "error": self.message()}))).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl From<revtrace_store::Error> for ApiError {
    fn from(err: revtrace_store::Error) -> Self {
        ApiError::Unavailable(err.to_string())
    }
}

impl From<revtrace_runtime::Error> for ApiError {
    fn from(err: revtrace_runtime::Error) -> Self {
        match err {
            revtrace_runtime::Error::InvalidOperation(msg) => ApiError::BadRequest(msg),
            other => ApiError::Unavailable(other.to_string()),
        }
    }
}

impl From<revtrace_engine::Error> for ApiError {
    fn from(err: revtrace_engine::Error) -> Self {
        match err {
            revtrace_engine::Error::InvalidTransition(msg) => ApiError::Conflict(msg),
            other => ApiError::Unavailable(other.to_string()),
        }
    }
}
