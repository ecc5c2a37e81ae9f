mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::CouchDaoError;
pub use store::CouchSessionStore;

use crate::dao::storage::StorageError;

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::Conflict { id } => StorageError::conflict(id),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn revision_conflicts_stay_retryable() {
        let err = StorageError::from(CouchDaoError::Conflict { id: "s1".into() });
        assert!(err.is_conflict());
        assert!(matches!(err, StorageError::Conflict { ref id } if id == "s1"));
    }

    #[test]
    fn other_failures_name_the_session() {
        let err = StorageError::from(CouchDaoError::SessionStatus {
            id: "s1".into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        });
        assert!(!err.is_conflict());
        match err {
            StorageError::Unavailable { message, .. } => {
                assert!(message.contains("session `s1`"), "{message}");
                assert!(message.contains("500"), "{message}");
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
    }
}
