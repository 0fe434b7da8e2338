use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// Prediction-service failures never appear here: they are absorbed by the
/// degraded enrichment path and the request still succeeds.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid parameter '{param}': {message}")]
    InvalidParam {
        param: &'static str,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::InvalidParam { .. } => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (summary, message, details): (&str, String, Option<Value>) = match &self {
            AppError::NotFound(msg) => ("Resource not found", msg.clone(), None),
            AppError::Validation(msg) => ("Validation failed", msg.clone(), None),
            AppError::InvalidParam { param, message } => (
                "Validation failed",
                message.clone(),
                Some(json!({ "param": param })),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    "Storage failure",
                    "A database error occurred".to_string(),
                    None,
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    "Storage failure",
                    "The record store did not respond".to_string(),
                    None,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    "Internal error",
                    "An internal server error occurred".to_string(),
                    None,
                )
            }
        };

        let mut error = json!({
            "code": status.as_u16(),
            "message": message,
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        let body = Json(json!({
            "success": false,
            "message": summary,
            "error": error,
        }));

        (status, body).into_response()
    }
}
