//! Error types of the CouchDB session store.

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`CouchDaoError`] failures.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures of the CouchDB session store, scoped to the session they concern.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// A required environment variable is not set.
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// `COUCH_BASE_URL` is not an http(s) URL.
    #[error("invalid CouchDB URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    /// Only one half of the basic-auth pair is configured.
    #[error("CouchDB credentials are incomplete: `{missing}` is not set")]
    IncompleteCredentials { missing: &'static str },
    /// Building the HTTP client failed.
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// Checking for, or creating, the session database failed.
    #[error("failed to prepare CouchDB database `{database}`")]
    EnsureDatabase {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// `GET` of the database during a health check could not be sent.
    #[error("CouchDB health check against `{database}` failed")]
    HealthCheck {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// The database endpoint answered with a non-success status.
    #[error("CouchDB database `{database}` answered with status {status}")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    /// `GET` of a session document could not be sent.
    #[error("failed to load session `{id}`")]
    LoadSession {
        id: String,
        #[source]
        source: reqwest::Error,
    },
    /// `PUT` of a session document could not be sent.
    #[error("failed to save session `{id}`")]
    SaveSession {
        id: String,
        #[source]
        source: reqwest::Error,
    },
    /// `DELETE` of a session document could not be sent.
    #[error("failed to delete session `{id}`")]
    DeleteSession {
        id: String,
        #[source]
        source: reqwest::Error,
    },
    /// A session document request got a status other than success, 404 or 409.
    #[error("CouchDB answered with status {status} for session `{id}`")]
    SessionStatus { id: String, status: StatusCode },
    /// The document `_rev` no longer matches (HTTP 409).
    #[error("CouchDB revision conflict on session `{id}`")]
    Conflict { id: String },
    /// A session document or write acknowledgement was not valid JSON.
    #[error("failed to decode CouchDB response for session `{id}`")]
    DecodeSession {
        id: String,
        #[source]
        source: reqwest::Error,
    },
    /// `_all_docs` could not be fetched or decoded.
    #[error("failed to list sessions")]
    ListSessions {
        #[source]
        source: reqwest::Error,
    },
    /// `_all_docs` answered with a non-success status.
    #[error("CouchDB answered with status {status} while listing sessions")]
    ListStatus { status: StatusCode },
    /// A listed `session::` document does not match the session model.
    #[error("listed CouchDB document `{doc_id}` is not a session")]
    DecodeListedSession {
        doc_id: String,
        #[source]
        source: serde_json::Error,
    },
    /// `HEAD /` for the `Date` header could not be sent.
    #[error("failed to read CouchDB server time")]
    ServerTime {
        #[source]
        source: reqwest::Error,
    },
}
