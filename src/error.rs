//! Error types for the feed service and the chat views.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failure reported by a feed service call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The service could not be reached or refused the request.
    #[error("feed service unavailable: {0}")]
    Unavailable(String),

    /// The subscription or the service shut down.
    #[error("feed closed")]
    Closed,
}

/// Failure of a chat view operation.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("view not found: {0}")]
    ViewNotFound(String),
}

impl ChatError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Feed(FeedError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
            Self::Feed(FeedError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ViewNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result type alias for chat view operations.
pub type Result<T> = std::result::Result<T, ChatError>;
