use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::{models::PatchError, storage::StorageError},
    state::ApplyError,
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { id } => ServiceError::NotFound(format!("session `{id}`")),
            StorageError::Conflict { .. } => ServiceError::InvalidState(err.to_string()),
            StorageError::Rejected {
                source: PatchError::UnknownPlayer(user_id),
                id,
            } => ServiceError::NotFound(format!("player `{user_id}` in session `{id}`")),
            StorageError::Rejected { source, .. } => ServiceError::InvalidState(source.to_string()),
            StorageError::Unavailable { .. } => ServiceError::Unavailable(err),
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::Phase;

    #[test]
    fn storage_errors_map_to_client_facing_kinds() {
        assert!(matches!(
            ServiceError::from(StorageError::not_found("s1")),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            ServiceError::from(StorageError::conflict("s1")),
            ServiceError::InvalidState(_)
        ));
        assert!(matches!(
            ServiceError::from(StorageError::rejected(
                "s1",
                PatchError::UnknownPlayer("ghost".into())
            )),
            ServiceError::NotFound(message) if message.contains("ghost")
        ));
        assert!(matches!(
            ServiceError::from(StorageError::rejected(
                "s1",
                PatchError::AlreadySubmitted {
                    user_id: "alice".into(),
                    phase: Phase::Writing,
                }
            )),
            ServiceError::InvalidState(_)
        ));
        assert!(matches!(
            ServiceError::from(StorageError::unavailable(
                "down".into(),
                std::io::Error::other("boom")
            )),
            ServiceError::Unavailable(_)
        ));
    }

    #[test]
    fn app_errors_pick_http_status() {
        let response = AppError::from(ServiceError::Degraded).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = AppError::from(ServiceError::InvalidState("late".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
