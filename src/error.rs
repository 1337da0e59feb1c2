//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Missing, expired or invalid session tokens
/// - **Authorization Errors**: Authenticated user lacks a permission
/// - **Resource Errors**: Requested records not found (or not visible to the caller)
/// - **Business Logic Errors**: Operations that violate a state transition
/// - **Validation Errors**: Invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Credentials or bearer token are missing, invalid, or expired.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Authentication required")]
    Unauthorized,

    /// The caller is authenticated but lacks the required permission.
    ///
    /// Returns HTTP 403 Forbidden.
    #[error("Missing permission: {0}")]
    Forbidden(&'static str),

    /// Requested record does not exist or is outside the caller's visibility scope.
    ///
    /// Returns HTTP 404 Not Found. The string names the entity kind.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The request collides with existing data (duplicate email, invoice number, ...).
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Conflict")]
    Conflict(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// The record is in a state that does not allow the operation
    /// (editing a locked timesheet, paying a void invoice, ...).
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Invalid state")]
    InvalidState(String),

    /// Unexpected failure outside the database (hashing, token signing).
    ///
    /// Returns HTTP 500; the message is logged, not returned.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Map a unique-constraint violation to `Conflict`, leaving other errors untouched.
    pub fn conflict_on_unique(err: sqlx::Error, message: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(message.to_string())
            }
            _ => AppError::Database(err),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::InvalidState(_) => "invalid_state",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Database and internal errors are logged and replaced by a generic message.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "An internal error occurred".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "An internal error occurred".to_string()
            }
            AppError::Conflict(msg)
            | AppError::InvalidRequest(msg)
            | AppError::InvalidState(msg) => msg.clone(),
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message
            }
        }));

        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn not_found_names_the_entity() {
        let (status, json) = body_json(AppError::NotFound("Timesheet")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
        assert_eq!(json["error"]["message"], "Timesheet not found");
    }

    #[tokio::test]
    async fn database_errors_are_hidden() {
        let (status, json) = body_json(AppError::Database(sqlx::Error::RowNotFound)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn invalid_state_carries_its_message() {
        let (status, json) =
            body_json(AppError::InvalidState("timesheet is locked".to_string())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"]["message"], "timesheet is locked");
    }

    #[test]
    fn forbidden_maps_to_403() {
        let err = AppError::Forbidden("invoices.generate");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "Missing permission: invoices.generate");
    }
}
