//! Error handling for EventBuddy
//!
//! This module defines the main error types used throughout the application
//! and provides a unified error handling strategy. Every request handler
//! reports failures as an [`ActionResult`], so the HTTP mapping lives here too.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field name -> validation messages
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Main error type for EventBuddy application
#[derive(Error, Debug)]
pub enum EventBuddyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Export error: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),

    #[error("QR code error: {0}")]
    QrCode(#[from] qrcode::types::QrError),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("User not found: {user_id}")]
    UserNotFound { user_id: i64 },

    #[error("Event not found: {event_id}")]
    EventNotFound { event_id: i64 },

    #[error("Registration not found: {registration_id}")]
    RegistrationNotFound { registration_id: i64 },

    #[error("Ticket not found")]
    TicketNotFound,

    #[error("Form not found for event: {event_id}")]
    FormNotFound { event_id: i64 },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Event is full")]
    CapacityFull,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outbound mail specific errors
#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid mail address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP transport failed: {0}")]
    Transport(String),
}

/// Result type alias for EventBuddy operations
pub type Result<T> = std::result::Result<T, EventBuddyError>;

/// Result type alias for mail operations
pub type MailResult<T> = std::result::Result<T, MailError>;

impl EventBuddyError {
    /// Build a validation error for a single field
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), vec![message.into()]);
        EventBuddyError::Validation(errors)
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            EventBuddyError::Database(_) => false,
            EventBuddyError::Migration(_) => false,
            EventBuddyError::Redis(_) => true,
            EventBuddyError::Mail(_) => true,
            EventBuddyError::Export(_) => false,
            EventBuddyError::QrCode(_) => false,
            EventBuddyError::Token(_) => false,
            EventBuddyError::Config(_) => false,
            EventBuddyError::PermissionDenied(_) => false,
            EventBuddyError::UserNotFound { .. } => false,
            EventBuddyError::EventNotFound { .. } => false,
            EventBuddyError::RegistrationNotFound { .. } => false,
            EventBuddyError::TicketNotFound => false,
            EventBuddyError::FormNotFound { .. } => false,
            EventBuddyError::InvalidStateTransition { .. } => false,
            EventBuddyError::CapacityFull => false,
            EventBuddyError::Conflict(_) => false,
            EventBuddyError::Validation(_) => false,
            EventBuddyError::Serialization(_) => false,
            EventBuddyError::Io(_) => true,
            EventBuddyError::UrlParse(_) => false,
            EventBuddyError::Authentication(_) => false,
            EventBuddyError::RateLimitExceeded => true,
            EventBuddyError::InvalidInput(_) => false,
            EventBuddyError::ServiceUnavailable(_) => true,
            EventBuddyError::Internal(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EventBuddyError::Database(_) => ErrorSeverity::Critical,
            EventBuddyError::Migration(_) => ErrorSeverity::Critical,
            EventBuddyError::Config(_) => ErrorSeverity::Critical,
            EventBuddyError::PermissionDenied(_) => ErrorSeverity::Warning,
            EventBuddyError::Authentication(_) => ErrorSeverity::Warning,
            EventBuddyError::Token(_) => ErrorSeverity::Warning,
            EventBuddyError::RateLimitExceeded => ErrorSeverity::Warning,
            EventBuddyError::InvalidInput(_) => ErrorSeverity::Info,
            EventBuddyError::Validation(_) => ErrorSeverity::Info,
            EventBuddyError::CapacityFull => ErrorSeverity::Info,
            EventBuddyError::Conflict(_) => ErrorSeverity::Info,
            EventBuddyError::InvalidStateTransition { .. } => ErrorSeverity::Info,
            EventBuddyError::UserNotFound { .. }
            | EventBuddyError::EventNotFound { .. }
            | EventBuddyError::RegistrationNotFound { .. }
            | EventBuddyError::TicketNotFound
            | EventBuddyError::FormNotFound { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// HTTP status the error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            EventBuddyError::Validation(_) | EventBuddyError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            EventBuddyError::Authentication(_) | EventBuddyError::Token(_) => {
                StatusCode::UNAUTHORIZED
            }
            EventBuddyError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            EventBuddyError::UserNotFound { .. }
            | EventBuddyError::EventNotFound { .. }
            | EventBuddyError::RegistrationNotFound { .. }
            | EventBuddyError::TicketNotFound
            | EventBuddyError::FormNotFound { .. } => StatusCode::NOT_FOUND,
            EventBuddyError::InvalidStateTransition { .. }
            | EventBuddyError::CapacityFull
            | EventBuddyError::Conflict(_) => StatusCode::CONFLICT,
            EventBuddyError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            EventBuddyError::ServiceUnavailable(_) | EventBuddyError::Mail(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EventBuddyError::Database(err) => match database_error_code(err).as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StatusCode::CONFLICT,
                Some("23503") | Some("23502") | Some("23514") | Some("22P02") => {
                    StatusCode::BAD_REQUEST
                }
                _ if matches!(err, sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message that is safe to show to the user
    pub fn user_message(&self) -> String {
        match self {
            EventBuddyError::Database(err) => database_error_message(err).to_string(),
            EventBuddyError::Migration(_)
            | EventBuddyError::Redis(_)
            | EventBuddyError::Export(_)
            | EventBuddyError::QrCode(_)
            | EventBuddyError::Serialization(_)
            | EventBuddyError::Io(_)
            | EventBuddyError::Config(_)
            | EventBuddyError::Internal(_) => "An unexpected error occurred".to_string(),
            EventBuddyError::Mail(_) => "Email could not be sent, please try again later".to_string(),
            EventBuddyError::Token(_) => "The link or session is invalid or has expired".to_string(),
            EventBuddyError::Validation(_) => "Please correct the highlighted fields".to_string(),
            other => other.to_string(),
        }
    }
}

/// Extract the SQLSTATE code of a database error, if any
pub fn database_error_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Map a database error to a user-facing message via its SQLSTATE code
pub fn database_error_message(err: &sqlx::Error) -> &'static str {
    if matches!(err, sqlx::Error::RowNotFound) {
        return "The requested record was not found";
    }
    message_for_sqlstate(database_error_code(err).as_deref())
}

/// Lookup table of Postgres SQLSTATE codes to user-facing messages
pub fn message_for_sqlstate(code: Option<&str>) -> &'static str {
    match code {
        Some("23505") => "A record with this value already exists",
        Some("23503") => "The referenced record does not exist",
        Some("23502") => "A required value is missing",
        Some("23514") => "A value violates a data constraint",
        Some("22P02") => "Invalid input format",
        Some("40001") | Some("40P01") => "The request conflicted with another update, please retry",
        _ => "A database error occurred",
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "INFO"),
            ErrorSeverity::Warning => write!(f, "WARN"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Structured result returned by every handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ActionResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            errors: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ActionResult<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            errors: None,
            message: Some(message.into()),
        }
    }

    pub fn failure(err: &EventBuddyError) -> Self {
        let errors = match err {
            EventBuddyError::Validation(fields) => Some(fields.clone()),
            _ => None,
        };

        Self {
            success: false,
            data: None,
            error: Some(err.user_message()),
            errors,
            message: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ActionResult<T> {
    fn into_response(self) -> Response {
        let status = if self.success { StatusCode::OK } else { StatusCode::BAD_REQUEST };
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for EventBuddyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::Error => {
                tracing::error!(error = %self, status = status.as_u16(), recoverable = self.is_recoverable(), "Request failed");
            }
            ErrorSeverity::Warning => {
                tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
            }
            ErrorSeverity::Info => {
                tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
            }
        }

        (status, Json(ActionResult::failure(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_lookup() {
        assert_eq!(message_for_sqlstate(Some("23505")), "A record with this value already exists");
        assert_eq!(message_for_sqlstate(Some("23503")), "The referenced record does not exist");
        assert_eq!(message_for_sqlstate(Some("40P01")), message_for_sqlstate(Some("40001")));
        assert_eq!(message_for_sqlstate(Some("99999")), "A database error occurred");
        assert_eq!(message_for_sqlstate(None), "A database error occurred");
    }

    #[test]
    fn test_row_not_found_maps_to_404() {
        let err = EventBuddyError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.user_message(), "The requested record was not found");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(EventBuddyError::CapacityFull.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            EventBuddyError::PermissionDenied("nope".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            EventBuddyError::field("email", "is required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(EventBuddyError::RateLimitExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_failure_result_carries_field_errors() {
        let err = EventBuddyError::field("email", "is required");
        let result = ActionResult::failure(&err);

        assert!(!result.success);
        let errors = result.errors.expect("field errors");
        assert_eq!(errors["email"], vec!["is required".to_string()]);
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = EventBuddyError::Internal("pool exhausted on host db-1".into());
        assert_eq!(err.user_message(), "An unexpected error occurred");
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_success_result_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ActionResult::ok(42)).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "data": 42 }));
    }
}
