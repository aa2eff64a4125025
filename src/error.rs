use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use validator::Validate;

/// Everything the wizard surfaces to a caller. None of these are fatal to
/// the process; the UI shows them as dismissible notifications and the user
/// re-triggers the failed action manually.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("No active project")]
    NoActiveProject,

    #[error("{message} (field: {field})")]
    Validation { message: String, field: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{operation} failed: {message}")]
    Generation {
        operation: &'static str,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: field.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn generation(operation: &'static str, message: impl Into<String>) -> Self {
        AppError::Generation {
            operation,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::NoActiveProject => (
                StatusCode::NOT_FOUND,
                json!({ "message": "No active project" }),
            ),
            AppError::Validation { message, field } => (
                StatusCode::BAD_REQUEST,
                json!({ "message": message, "field": field }),
            ),
            AppError::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                json!({ "message": format!("{entity} {id} not found") }),
            ),
            AppError::Generation { operation, message } => (
                StatusCode::BAD_GATEWAY,
                json!({ "message": message, "operation": operation }),
            ),
            AppError::Storage(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "message": message }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Runs `validator` rules on a request payload, reporting the first failing
/// field as a 400 `{message, field}` body.
pub fn validate_payload<T: Validate>(payload: &T) -> Result<(), AppError> {
    payload.validate().map_err(|errors| {
        errors
            .field_errors()
            .into_iter()
            .next()
            .map(|(field, field_errors)| {
                let message = field_errors
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "invalid value".to_string());
                AppError::validation(field.to_string(), message)
            })
            .unwrap_or_else(|| AppError::validation("body", "invalid request body"))
    })
}
