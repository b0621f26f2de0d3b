use crate::state::CrawlState;
use crate::storage::StorageError;
use crate::DriftnetError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors returned by API handlers, each mapped to one status code
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("crawl already running (state: {0})")]
    AlreadyRunning(CrawlState),

    #[error("result store unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyRunning(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::RunNotFound(_) => Self::NotFound(error.to_string()),
            e if e.is_unavailable() => Self::Unavailable(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<DriftnetError> for ApiError {
    fn from(error: DriftnetError) -> Self {
        match error {
            DriftnetError::AlreadyRunning { state } => Self::AlreadyRunning(state),
            DriftnetError::Storage(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Error body: `{ "success": false, "error": "..." }`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    /// Current crawl state, on a rejected start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<CrawlState>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            state: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Unavailable(_) | Self::Internal(_) => tracing::error!("API error: {}", self),
            _ => tracing::debug!("API error: {}", self),
        }

        let mut body = ErrorResponse::new(self.to_string());
        if let Self::AlreadyRunning(state) = self {
            body.state = Some(state);
        }
        (status, Json(body)).into_response()
    }
}
