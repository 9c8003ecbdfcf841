use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hybrid_search::{BackfillError, LifecycleError, SearchError};
use serde::{Deserialize, Serialize};

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("no active index version for `{0}`")]
    NoActiveIndex(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Throttled(String),

    #[error("Request timeout")]
    Timeout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ServerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NoActiveIndex(_) | ServerError::Throttled(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "INVALID_REQUEST",
            ServerError::NoActiveIndex(_) => "NO_ACTIVE_INDEX",
            ServerError::Conflict(_) => "CONFLICT",
            ServerError::Validation(_) => "VALIDATION_FAILED",
            ServerError::Throttled(_) => "THROTTLED",
            ServerError::Timeout => "REQUEST_TIMEOUT",
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<SearchError> for ServerError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidRequest(msg) => ServerError::InvalidRequest(msg),
            SearchError::NoActiveIndex(name) => ServerError::NoActiveIndex(name),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<LifecycleError> for ServerError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Conflict(msg) => ServerError::Conflict(msg),
            err @ LifecycleError::InvalidTransition { .. } => ServerError::Conflict(err.to_string()),
            LifecycleError::Validation(msg) => ServerError::Validation(msg),
            LifecycleError::NotFound(what) => ServerError::NotFound(what),
            LifecycleError::Backend(err) => ServerError::Internal(err.to_string()),
        }
    }
}

impl From<BackfillError> for ServerError {
    fn from(err: BackfillError) -> Self {
        match err {
            BackfillError::InvalidOptions(msg) => ServerError::InvalidRequest(msg),
            err @ BackfillError::Throttled { .. } => ServerError::Throttled(err.to_string()),
            BackfillError::Index(err) => ServerError::Internal(err.to_string()),
        }
    }
}

impl From<index::IndexError> for ServerError {
    fn from(err: index::IndexError) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
