use std::error::Error;
use thiserror::Error;

use crate::dao::models::PatchError;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend is unreachable or failed; the supervisor may switch to degraded mode.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The addressed session document does not exist.
    #[error("session `{id}` not found")]
    NotFound { id: String },
    /// The document changed since it was read, or a patch guard did not match.
    #[error("concurrent modification of session `{id}`")]
    Conflict { id: String },
    /// A player patch could not be merged into the stored document.
    #[error("patch rejected for session `{id}`")]
    Rejected {
        id: String,
        #[source]
        source: PatchError,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a not-found error for the given session id.
    pub fn not_found(id: impl Into<String>) -> Self {
        StorageError::NotFound { id: id.into() }
    }

    /// Construct a conflict error for the given session id.
    pub fn conflict(id: impl Into<String>) -> Self {
        StorageError::Conflict { id: id.into() }
    }

    /// Construct a rejected-patch error for the given session id.
    pub fn rejected(id: impl Into<String>, source: PatchError) -> Self {
        StorageError::Rejected {
            id: id.into(),
            source,
        }
    }

    /// Whether re-running the read-modify-write could succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}
