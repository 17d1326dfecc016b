//! Error Types for the Stafflane API
//!
//! `ApiError` is the single error shape returned by every endpoint. Each
//! `ErrorCode` maps to an HTTP status code, and queue errors convert into
//! the matching code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use stafflane_core::{QueueError, ScopeParseError, StafflaneError};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Field format is incorrect
    InvalidFormat,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested operation does not exist
    OperationNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Operation with the same id already exists
    EntityAlreadyExists,

    /// Operation conflicts with current state
    StateConflict,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Queue is shutting down or not running
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidInput | ErrorCode::InvalidFormat => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::OperationNotFound => StatusCode::NOT_FOUND,
            ErrorCode::EntityAlreadyExists | ErrorCode::StateConflict => StatusCode::CONFLICT,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::OperationNotFound => "Operation not found",
            ErrorCode::EntityAlreadyExists => "Operation already exists",
            ErrorCode::StateConflict => "Operation conflicts with current state",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (offending field, current status)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create an error using the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
        .with_details(json!({ "field": field }))
    }

    pub fn operation_not_found(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::OperationNotFound,
            format!("Operation {} not found", id),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match &err {
            QueueError::NotFound { id } => ApiError::operation_not_found(id),
            QueueError::InvalidTransition { from, .. } => {
                ApiError::new(ErrorCode::StateConflict, err.to_string())
                    .with_details(json!({ "status": from }))
            }
            QueueError::Duplicate { .. } => {
                ApiError::new(ErrorCode::EntityAlreadyExists, err.to_string())
            }
            QueueError::InvalidRequest { field, .. } => {
                ApiError::new(ErrorCode::ValidationFailed, err.to_string())
                    .with_details(json!({ "field": field }))
            }
            QueueError::ShutDown => ApiError::service_unavailable(err.to_string()),
            QueueError::AlreadyStarted => ApiError::new(ErrorCode::StateConflict, err.to_string()),
            QueueError::Telemetry { .. } => {
                tracing::error!(error = %err, "Telemetry error");
                ApiError::internal_error(err.to_string())
            }
        }
    }
}

impl From<StafflaneError> for ApiError {
    fn from(err: StafflaneError) -> Self {
        match err {
            StafflaneError::Queue(err) => err.into(),
            StafflaneError::Config(err) => {
                ApiError::new(ErrorCode::InvalidInput, format!("Invalid configuration: {err}"))
            }
            StafflaneError::Operation(err) => ApiError::internal_error(err.to_string()),
        }
    }
}

impl From<ScopeParseError> for ApiError {
    fn from(err: ScopeParseError) -> Self {
        ApiError::invalid_format(
            "scopes",
            &format!("all, system, project:<id> or agent:<id> ({err})"),
        )
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use stafflane_core::{new_operation_id, OperationStatus};

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::ValidationFailed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::OperationNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::StateConflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::ServiceUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_queue_error_conversion() {
        let id = new_operation_id();
        let not_found: ApiError = QueueError::NotFound { id }.into();
        assert_eq!(not_found.code, ErrorCode::OperationNotFound);

        let conflict: ApiError = QueueError::InvalidTransition {
            id,
            from: OperationStatus::Completed,
            to: OperationStatus::Cancelled,
        }
        .into();
        assert_eq!(conflict.code, ErrorCode::StateConflict);
        assert_eq!(conflict.details, Some(json!({ "status": "completed" })));

        let invalid: ApiError = QueueError::InvalidRequest {
            field: "capability".to_string(),
            reason: "must not be blank".to_string(),
        }
        .into();
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_serializes_code() {
        let err = ApiError::from_code(ErrorCode::InternalError);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "INTERNAL_ERROR");
        assert!(json.get("details").is_none());
    }
}
