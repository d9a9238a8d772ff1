// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::models::exam::Pricing;

/// Global Application Error Enum.
/// Every failure of the engine is one of these typed, recoverable variants,
/// except `Internal` which wraps store/infrastructure failures unchanged.
#[derive(Debug, Error)]
pub enum AppError {
    // 404 Not Found (exam, session, purchase record, result)
    #[error("{0}")]
    NotFound(String),

    // 402 Payment Required, carries the pricing the caller should present
    #[error("{message}")]
    AccessDenied { message: String, pricing: Pricing },

    // 409 Conflict
    #[error("maximum repetitions reached ({max_repetitions})")]
    MaxRepetitionsExceeded { max_repetitions: u32 },

    // 409 Conflict
    #[error("exam {exam_id} has already been purchased by user {user_id}")]
    DuplicatePurchase { user_id: i64, exam_id: i64 },

    // 422 Unprocessable Entity
    #[error("requested {requested} questions for {key} but only {available} exist")]
    InsufficientQuestions {
        key: String,
        requested: usize,
        available: usize,
    },

    // 409 Conflict
    #[error("{0}")]
    InvalidState(String),

    // 403 Forbidden
    #[error("{0}")]
    Forbidden(String),

    // 401 Unauthorized
    #[error("{0}")]
    Unauthorized(String),

    // 400 Bad Request
    #[error("{0}")]
    Validation(String),

    // 500 Internal Server Error
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AccessDenied { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::MaxRepetitionsExceeded { .. }
            | AppError::DuplicatePurchase { .. }
            | AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::InsufficientQuestions { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                json!({ "error": "Internal Server Error" })
            }
            AppError::AccessDenied { message, pricing } => json!({
                "error": message,
                "pricing": pricing,
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::Internal`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
