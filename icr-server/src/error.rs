//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use icr_core::{IcrError, RepositoryError, StorageError};
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Not found - requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict - the request clashes with the current state of a resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request timeout - operation took too long
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Service unavailable - required service is not configured or available
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Pipeline error from icr-core
    #[error("ICR error: {0}")]
    Icr(#[from] IcrError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Icr(e) => match e {
                // Client-provided invalid input → 400
                IcrError::Validation(_) | IcrError::ImageDecode { .. } => StatusCode::BAD_REQUEST,

                IcrError::NotFound(_) | IcrError::Storage(StorageError::NotFound(_)) => {
                    StatusCode::NOT_FOUND
                }

                // Out-of-order steps and unique-key races → 409
                IcrError::StateTransition { .. }
                | IcrError::DuplicateDetected { .. }
                | IcrError::Repository(RepositoryError::Duplicate(_)) => StatusCode::CONFLICT,

                // OCR provider failures and timeouts → 503
                IcrError::ExternalProvider(_) => StatusCode::SERVICE_UNAVAILABLE,

                IcrError::PartialBatchFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,

                // Internal processing failures → 500
                IcrError::ImageEncode(_)
                | IcrError::Storage(_)
                | IcrError::Repository(_)
                | IcrError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Icr(e) => match e {
                IcrError::Validation(_) => "VALIDATION_ERROR",
                IcrError::NotFound(_) => "NOT_FOUND",
                IcrError::DuplicateDetected { .. } => "DUPLICATE_DETECTED",
                IcrError::StateTransition { .. } => "STATE_TRANSITION_ERROR",
                IcrError::ExternalProvider(_) => "OCR_PROVIDER_ERROR",
                IcrError::PartialBatchFailure { .. } => "PARTIAL_BATCH_FAILURE",
                IcrError::ImageDecode { .. } => "IMAGE_DECODE_ERROR",
                IcrError::ImageEncode(_) => "IMAGE_ENCODE_ERROR",
                IcrError::Storage(StorageError::NotFound(_)) => "FILE_NOT_FOUND",
                IcrError::Storage(_) => "STORAGE_ERROR",
                IcrError::Repository(RepositoryError::Duplicate(_)) => "DUPLICATE_KEY",
                IcrError::Repository(_) => "REPOSITORY_ERROR",
                IcrError::Internal(_) => "INTERNAL_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            // Infrastructure details stay in the logs
            Self::Icr(e) => match e {
                IcrError::Storage(StorageError::NotFound(_)) => {
                    "Stored file is missing".to_string()
                }
                IcrError::Storage(_) => "File storage error".to_string(),
                IcrError::Repository(RepositoryError::Duplicate(_)) => {
                    "Record already exists".to_string()
                }
                IcrError::Repository(_) => "Database error".to_string(),
                IcrError::ImageEncode(_) => "Image encoding failed".to_string(),
                IcrError::Internal(_) => "Internal server error".to_string(),
                other => other.to_string(),
            },
            // For other errors, use the Display message
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Icr(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        // All error responses include a `code` field for programmatic error handling
        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icr_errors_map_to_status_and_code() {
        let cases = [
            (
                ApiError::from(IcrError::Validation("bad".into())),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                ApiError::from(IcrError::NotFound("scan".into())),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                ApiError::from(IcrError::StateTransition {
                    entity: "GradedCardScan",
                    current: "uploaded".into(),
                    attempted: "matched".into(),
                }),
                StatusCode::CONFLICT,
                "STATE_TRANSITION_ERROR",
            ),
            (
                ApiError::from(IcrError::ExternalProvider("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
                "OCR_PROVIDER_ERROR",
            ),
            (
                ApiError::from(IcrError::Repository(RepositoryError::Backend("db".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
                "REPOSITORY_ERROR",
            ),
        ];

        for (error, status, code) in cases {
            assert_eq!(error.status_code(), status);
            assert_eq!(error.error_code(), code);
        }
    }

    #[test]
    fn test_infrastructure_details_are_sanitized() {
        let error = ApiError::from(IcrError::Repository(RepositoryError::Backend(
            "connection refused to 10.0.0.3".into(),
        )));
        assert_eq!(error.client_message(), "Database error");

        let error = ApiError::from(IcrError::Validation("scan_ids must not be empty".into()));
        assert!(error.client_message().contains("scan_ids"));
    }
}
