//! Error types and Axum response conversions.

use crate::vm::ProvisionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application error types.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing, malformed, expired, forged or mis-bound anti-forgery token.
    /// Deliberately carries no detail.
    #[error("Invalid anti-forgery token")]
    InvalidToken,

    #[error("Rate limited until {reset_at}")]
    RateLimited { reset_at: u64 },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {session_id}")]
    SessionConflict { session_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Internal(msg) => {
                // Log detailed error server-side, return generic message to client
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::InvalidToken => (
                StatusCode::FORBIDDEN,
                json!({ "error": "Invalid or missing CSRF token" }),
            ),
            AppError::RateLimited { reset_at } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "Too many requests", "resetTime": reset_at }),
            ),
            AppError::SessionNotFound(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::SessionConflict { session_id } => (
                StatusCode::CONFLICT,
                json!({ "error": "Session already exists", "sessionId": session_id }),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Upstream(msg) => {
                tracing::error!(error = %msg, "Upstream VM provider failure");
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": "Failed to create session" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<ProvisionError> for AppError {
    fn from(err: ProvisionError) -> Self {
        AppError::Upstream(err.to_string())
    }
}
