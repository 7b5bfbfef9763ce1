//! HTTP surface for resumable chunked uploads.
//!
//! Exposes the resume probe, chunk append and merge operations of a
//! [`ferry_store::ChunkStore`] over plain HTTP with JSON responses, plus a
//! read-only route for merged artifacts.

mod routes;
mod server;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ferry_protocol::messages::ErrorResponse;
use ferry_store::StoreError;

pub use routes::{AppState, router};
pub use server::{ServerConfig, UploadServer};

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("invalid name: {0}")]
    InvalidName(#[from] ferry_protocol::KeyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("server already running")]
    AlreadyRunning,
}

impl ServerError {
    /// HTTP status reported to clients for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidName(_) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::OffsetMismatch { .. } | StoreError::Incomplete { .. }) => {
                StatusCode::CONFLICT
            }
            Self::Store(StoreError::Aborted { .. }) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::Io(_)) | Self::Io(_) | Self::AlreadyRunning => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, "request failed: {self}");
        } else {
            tracing::debug!(%status, "request rejected: {self}");
        }
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}
