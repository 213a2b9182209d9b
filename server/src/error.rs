//! Failures of one generation request, shared by `/generate` and the
//! streaming session.
//!
//! HTTP callers get a JSON `{error, code}` body; the stream sends the same
//! `Display` text as an in-band `{"error": ...}` message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request cannot be served as sent, e.g. empty text.
    #[error("{0}")]
    BadRequest(String),

    /// The model call failed or produced unusable audio.
    #[error("generation failed: {0:#}")]
    Generation(#[from] anyhow::Error),

    /// The blocking worker running the model never returned a result.
    #[error("generation worker failed: {0}")]
    Worker(#[from] JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Generation(_) | ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!("{message}");
        }

        let body = Json(ErrorBody {
            error: message,
            code: status.as_u16(),
        });
        (status, body).into_response()
    }
}
