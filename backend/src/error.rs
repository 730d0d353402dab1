//! Standardized error handling for the billcycle API
//!
//! This module provides a consistent error response format across all endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "VALIDATION_ERROR", "NOT_FOUND", "OVERPAYMENT")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    // Convenience constructors for common error types

    /// Create a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> AppError {
        AppError::NotFound(message.into())
    }

    /// Create a 500 Internal Server Error
    pub fn internal(message: impl Into<String>) -> AppError {
        AppError::InternalError(message.into())
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> AppError {
        AppError::BadRequest(message.into())
    }

    /// Create a 409 state-conflict error (illegal lifecycle move)
    pub fn state_conflict(message: impl Into<String>) -> AppError {
        AppError::StateConflict(message.into())
    }
}

/// Application error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum AppError {
    // Validation errors
    ValidationError { details: HashMap<String, Vec<String>> },
    BadRequest(String),

    // Resource errors
    NotFound(String),

    // Lifecycle errors
    StateConflict(String),
    Overpayment {
        invoice_total: Decimal,
        already_paid: Decimal,
        remaining: Decimal,
    },
    InvoiceNumberCollision,

    // Server errors
    InternalError(String),
    DatabaseError(String),
    ExternalServiceError { service: String, message: String },
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError { .. } | Self::Overpayment { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StateConflict(_) | Self::InvoiceNumberCollision => StatusCode::CONFLICT,
            Self::InternalError(_) | Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ExternalServiceError { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::Overpayment { .. } => "OVERPAYMENT",
            Self::InvoiceNumberCollision => "INVOICE_NUMBER_COLLISION",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ExternalServiceError { .. } => "EXTERNAL_SERVICE_ERROR",
        }
    }

    /// Get the error message. Internal detail goes to the log, never to callers.
    pub fn message(&self) -> String {
        match self {
            Self::ValidationError { .. } => "Validation failed".to_string(),
            Self::BadRequest(msg) => msg.clone(),
            Self::NotFound(resource) => format!("{} not found", resource),
            Self::StateConflict(msg) => msg.clone(),
            Self::Overpayment {
                invoice_total,
                already_paid,
                remaining,
            } => format!(
                "Payment would exceed the invoice total: invoice total is {}, {} already paid, maximum additional payment is {}",
                invoice_total, already_paid, remaining
            ),
            Self::InvoiceNumberCollision => {
                "Could not allocate a unique invoice number, please retry".to_string()
            }
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "A database error occurred".to_string()
            }
            Self::ExternalServiceError { service, message } => {
                tracing::error!("External service error ({}): {}", service, message);
                format!("External service '{}' is unavailable", service)
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = ApiError::new(self.error_code(), self.message());

        // Add details for validation errors
        if let Self::ValidationError { details } = &self {
            error.details = Some(details.clone());
        }

        // Overpayment responses carry the exact amounts so the caller can
        // correct and resubmit
        if let Self::Overpayment {
            invoice_total,
            already_paid,
            remaining,
        } = &self
        {
            let mut details = HashMap::new();
            details.insert("invoice_total".to_string(), vec![invoice_total.to_string()]);
            details.insert("already_paid".to_string(), vec![already_paid.to_string()]);
            details.insert("remaining".to_string(), vec![remaining.to_string()]);
            error.details = Some(details);
        }

        (status, Json(error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource".to_string()),
            _ => Self::DatabaseError(err.to_string()),
        }
    }
}

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, AppError>;

/// True when the underlying database error is a unique-constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

/// Helper to create validation errors
pub fn validation_error(field: &str, message: &str) -> AppError {
    let mut details = HashMap::new();
    details.insert(field.to_string(), vec![message.to_string()]);
    AppError::ValidationError { details }
}

/// Helper to add multiple validation errors
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
        }
    }

    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.details
            .entry(field.to_string())
            .or_insert_with(Vec::new)
            .push(message.to_string());
        self
    }

    pub fn build(self) -> Option<AppError> {
        if self.details.is_empty() {
            None
        } else {
            Some(AppError::ValidationError {
                details: self.details,
            })
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.details.is_empty()
    }
}

impl Default for ValidationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_builder() {
        let error = ValidationBuilder::new()
            .error("amount", "Amount must be positive")
            .error("amount", "Amount is required")
            .error("frequency", "Unknown frequency")
            .build();

        assert!(error.is_some());
        if let Some(AppError::ValidationError { details }) = error {
            assert_eq!(details.get("amount").unwrap().len(), 2);
            assert_eq!(details.get("frequency").unwrap().len(), 1);
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::Overpayment {
                invoice_total: Decimal::from(100),
                already_paid: Decimal::from(60),
                remaining: Decimal::from(40),
            }
            .error_code(),
            "OVERPAYMENT"
        );
        assert_eq!(
            AppError::NotFound("Invoice".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::StateConflict("already cancelled".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::ExternalServiceError {
                service: "smtp".into(),
                message: "connection refused".into(),
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn overpayment_message_reports_remaining_amount() {
        let err = AppError::Overpayment {
            invoice_total: Decimal::new(10000, 2),
            already_paid: Decimal::ZERO,
            remaining: Decimal::new(10000, 2),
        };
        let msg = err.message();
        assert!(msg.contains("100.00"));
        assert!(msg.contains("maximum additional payment is 100.00"));
    }
}
