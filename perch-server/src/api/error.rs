//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use perch_core::lifecycle::{Action, TransitionError};

use crate::repository::StoreError;
use crate::service::build_service::BuildError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized,
    Conflict(String),
    /// Action refused in the build's current status.
    InvalidState(String),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InvalidState(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Database(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidState {
                action: Action::Cancel,
                ..
            } => ApiError::BadRequest(err.to_string()),
            _ => ApiError::InvalidState(err.to_string()),
        }
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::InvalidState(err) => err.into(),
            BuildError::NotFound(msg) => ApiError::NotFound(msg),
            BuildError::BadRequest(msg) => ApiError::BadRequest(msg),
            BuildError::Storage(err) => err.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use perch_core::domain::Status;

    #[test]
    fn test_cancel_refusal_is_bad_request() {
        let err: ApiError = TransitionError::InvalidState {
            action: Action::Cancel,
            status: Status::Success,
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_other_refusals_are_server_errors() {
        let err: ApiError = BuildError::InvalidState(TransitionError::InvalidState {
            action: Action::Approve,
            status: Status::Running,
        })
        .into();
        assert!(matches!(&err, ApiError::InvalidState(msg) if msg == "cannot approve a build with status running"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_missing_rows_are_not_found() {
        let err: ApiError = BuildError::from(StoreError::NotFound("build 3".to_string())).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
