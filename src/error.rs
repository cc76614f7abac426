use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error;
use std::fmt;

use crate::library::listing::ListingError;
use crate::library::mutate::MutateError;
use crate::metadata::MetadataError;

/// The primary error type for the HTTP layer.
///
/// Library modules return their own error types and are converted at the
/// handler boundary, so every failed request produces the same JSON envelope.
#[derive(Debug)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    Internal(anyhow::Error),
    /// For client errors due to invalid requests.
    BadRequest(String),
    /// For when a requested resource is not found.
    NotFound(String),
    /// For when a request conflicts with the current state of the server.
    Conflict(String),
    /// For when a service is temporarily unavailable.
    ServiceUnavailable(String),
    /// For errors related to database operations.
    Database(String),
    /// For when user input is invalid.
    InvalidInput(String),
    /// For failures talking to the metadata search service.
    Upstream(String),
    /// For when a request is not authorized.
    Unauthorized(String),
    /// For when a client has sent too many requests in a given amount of time.
    RateLimited {
        /// The number of seconds to wait before retrying the request.
        retry_after_seconds: u64,
    },
    /// For when a specific field in a request fails validation.
    ValidationError {
        /// The name of the field that failed validation.
        field: String,
        /// A message describing the validation error.
        message: String,
    },
    /// For errors related to I/O operations.
    IoError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::RateLimited { retry_after_seconds } => {
                write!(f, "Rate limited. Retry after {} seconds", retry_after_seconds)
            }
            AppError::ValidationError { field, message } => {
                write!(f, "Validation error on field '{}': {}", field, message)
            }
            AppError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::InvalidInput(_) | AppError::ValidationError { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) | AppError::Database(_) | AppError::Upstream(_) | AppError::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, error_message, details) = match self {
            AppError::Internal(e) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(%error_id, "Internal error: {:?}", e);
                (
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::BadRequest(msg) => ("BAD_REQUEST", msg, None),
            AppError::NotFound(msg) => ("NOT_FOUND", msg, None),
            AppError::Conflict(msg) => ("CONFLICT", msg, None),
            AppError::ServiceUnavailable(msg) => ("SERVICE_UNAVAILABLE", msg, None),
            AppError::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                ("DATABASE_ERROR", "A database error occurred".to_string(), None)
            }
            AppError::InvalidInput(msg) => ("INVALID_INPUT", msg, None),
            AppError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                ("UPSTREAM_ERROR", "The metadata service request failed".to_string(), None)
            }
            AppError::Unauthorized(msg) => ("UNAUTHORIZED", msg, None),
            AppError::RateLimited { retry_after_seconds } => (
                "RATE_LIMITED",
                format!("Too many requests. Please retry after {} seconds", retry_after_seconds),
                Some(json!({ "retry_after_seconds": retry_after_seconds })),
            ),
            AppError::ValidationError { field, message } => (
                "VALIDATION_ERROR",
                format!("Validation failed for field '{}'", field),
                Some(json!({ "field": field, "message": message })),
            ),
            AppError::IoError(msg) => {
                tracing::error!("I/O error: {}", msg);
                ("IO_ERROR", "An I/O error occurred".to_string(), None)
            }
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => AppError::Database(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut => {
                AppError::ServiceUnavailable("Database connection pool timed out".to_string())
            }
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(format!("{}: {}", err.kind(), err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(anyhow::anyhow!("blocking task failed: {}", err))
    }
}

impl From<MutateError> for AppError {
    fn from(err: MutateError) -> Self {
        match err {
            MutateError::InvalidPath(msg) => AppError::InvalidInput(msg),
            MutateError::NotFound(msg) => AppError::NotFound(msg),
            MutateError::Conflict(msg) => AppError::Conflict(msg),
            MutateError::Io(e) => AppError::from(e),
        }
    }
}

impl From<ListingError> for AppError {
    fn from(err: ListingError) -> Self {
        match err {
            ListingError::InvalidPath(path) => AppError::InvalidInput(format!("Invalid path: {}", path)),
            ListingError::NotFound(path) => AppError::NotFound(format!("Directory not found: {}", path)),
            ListingError::Io(e) => AppError::from(e),
            ListingError::Task(e) => AppError::from(e),
        }
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Store(e) => AppError::from(e),
            MetadataError::Upstream(msg) => AppError::Upstream(msg),
            MetadataError::NoResults(query) => {
                AppError::NotFound(format!("No metadata found for '{}'", query))
            }
        }
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

/// An extension trait for `Option` that provides a convenient way to convert
/// an `Option` to a `Result` with a `NotFound` error.
pub trait OptionExt<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}

/// Helpers for validating request fields before they reach the library layer.
pub mod validation {
    use super::*;

    /// Rejects empty strings and strings with null characters.
    pub fn require_field(value: &str, field: &str) -> AppResult<()> {
        if value.trim().is_empty() {
            return Err(AppError::ValidationError {
                field: field.to_string(),
                message: format!("{} is required", field),
            });
        }
        if value.contains('\0') {
            return Err(AppError::ValidationError {
                field: field.to_string(),
                message: "Value contains null characters".to_string(),
            });
        }
        Ok(())
    }
}
