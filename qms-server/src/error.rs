//! Error types for qms-server
//!
//! `ApiError` is the single translation point from internal failures to
//! HTTP responses. Unexpected errors are logged here and answered with a
//! generic message so database details never reach the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use qms_common::workflow::TransitionError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::services::templating::TemplateError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Validation failure or illegal status transition (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or unknown API token (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Duplicate key or concurrent modification (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<qms_common::Error> for ApiError {
    fn from(err: qms_common::Error) -> Self {
        match err {
            qms_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            qms_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            qms_common::Error::Conflict(msg) => ApiError::Conflict(msg),
            qms_common::Error::Database(e) => ApiError::from(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if qms_common::error::is_write_conflict(&err) {
            return ApiError::Conflict("The record was modified concurrently".to_string());
        }
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return ApiError::Conflict("A record with the same unique value already exists".to_string());
            }
            if db_err.is_foreign_key_violation() {
                return ApiError::BadRequest("Referenced record does not exist".to_string());
            }
            if db_err.is_check_violation() {
                return ApiError::BadRequest("Value out of allowed range".to_string());
            }
        }
        ApiError::Internal(format!("Database error: {}", err))
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<TemplateError> for ApiError {
    fn from(err: TemplateError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("Serialization error: {}", err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(format!("IO error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(detail) => {
                error!("Request failed: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_map_to_status() {
        let cases = [
            (qms_common::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (qms_common::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (qms_common::Error::Conflict("x".into()), StatusCode::CONFLICT),
            (qms_common::Error::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = ApiError::Internal("no such table: secrets".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["message"], "Internal server error");
        assert!(!bytes.windows(7).any(|w| w == b"secrets"));
    }
}
