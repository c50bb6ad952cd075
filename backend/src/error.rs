//! Error handling for the salon stock server
//!
//! Every failure the reconciler can surface maps to one variant here and to a
//! stable error code in the JSON response body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{DateError, IntegrityViolation, LedgerError};
use thiserror::Error;
use uuid::Uuid;

/// SQLSTATE codes that mean "another writer got there first, try again"
const RETRYABLE_SQLSTATES: [&str; 3] = ["40001", "40P01", "55P03"];
const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid transaction date: {0}")]
    InvalidDate(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    // Reconciliation errors
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Recomputation integrity violated: {0}")]
    RecomputationIntegrity(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the operation may succeed if attempted again from scratch
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ConcurrencyConflict(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::InvalidDate(_) => "INVALID_DATE",
            AppError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            AppError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            AppError::RecomputationIntegrity(_) => "RECOMPUTATION_INTEGRITY",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::InvalidDate(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::ProductNotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateEntry(_) | AppError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::RecomputationIntegrity(_)
            | AppError::Configuration(_)
            | AppError::DatabaseError(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some(code) if RETRYABLE_SQLSTATES.contains(&code) => {
                    return AppError::ConcurrencyConflict(db_err.message().to_string());
                }
                Some(FOREIGN_KEY_VIOLATION) => {
                    return AppError::validation("product_id", "Referenced product does not exist");
                }
                Some(UNIQUE_VIOLATION) => {
                    return AppError::DuplicateEntry(
                        db_err.constraint().unwrap_or("record").to_string(),
                    );
                }
                _ => {}
            }
        }
        AppError::DatabaseError(err)
    }
}

impl From<DateError> for AppError {
    fn from(err: DateError) -> Self {
        AppError::InvalidDate(err.to_string())
    }
}

impl From<IntegrityViolation> for AppError {
    fn from(err: IntegrityViolation) -> Self {
        AppError::RecomputationIntegrity(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::EntryNotFound(id) => AppError::NotFound(format!("Ledger entry {}", id)),
            LedgerError::DuplicateEntry(id) => AppError::DuplicateEntry(format!("ledger entry {}", id)),
            LedgerError::ForeignEntry { .. } => AppError::Internal(err.to_string()),
            LedgerError::Overflow(_) => AppError::RecomputationIntegrity(err.to_string()),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Validation { message, .. } => message.clone(),
            AppError::NotFound(resource) => format!("{} not found", resource),
            AppError::DuplicateEntry(what) => format!("A record with this {} already exists", what),
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        };
        let field = match &self {
            AppError::Validation { field, .. } => Some(field.clone()),
            AppError::InvalidDate(_) => Some("transaction_date".to_string()),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(code = self.code(), "Error: {:?}", self);
        } else {
            tracing::warn!(code = self.code(), "Request rejected: {}", self);
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                field,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::validation("quantity", "bad").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidDate("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::ProductNotFound(Uuid::nil()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::ConcurrencyConflict("busy".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::RecomputationIntegrity("drift".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::Timeout("slow".into()).status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(AppError::ConcurrencyConflict("lock".into()).is_retryable());
        assert!(!AppError::Timeout("slow".into()).is_retryable());
        assert!(!AppError::RecomputationIntegrity("drift".into()).is_retryable());
        assert!(!AppError::ProductNotFound(Uuid::nil()).is_retryable());
    }

    #[test]
    fn test_ledger_errors_map_to_app_errors() {
        let id = Uuid::new_v4();
        assert!(matches!(AppError::from(LedgerError::EntryNotFound(id)), AppError::NotFound(_)));
        assert!(matches!(
            AppError::from(LedgerError::Overflow(id)),
            AppError::RecomputationIntegrity(_)
        ));
    }

    #[test]
    fn test_date_error_maps_to_invalid_date() {
        let err = AppError::from(DateError::Unparsable("soon".into()));
        assert_eq!(err.code(), "INVALID_DATE");
    }

    #[test]
    fn test_row_not_found_is_database_error() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::DatabaseError(_)));
    }
}
