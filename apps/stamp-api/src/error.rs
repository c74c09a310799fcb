//! Error types for the stamp server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stamp_core::{ErrorKind, StampError};
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Stamp(#[from] StampError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ServerError::Stamp(err) => (stamp_status(err), err.kind().as_str()),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

fn stamp_status(err: &StampError) -> StatusCode {
    if err.is_item_level() {
        return StatusCode::UNPROCESSABLE_ENTITY;
    }
    match err.kind() {
        ErrorKind::DocumentTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::DocumentDecodeFailure => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InvalidConfig | ErrorKind::ArtworkMissing => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
