use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

/// Result alias of the MongoDB session store.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY: i32 = 11000;

/// Failures of the MongoDB session store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// A required environment variable is not set.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// `MONGO_URI` could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The driver rejected the parsed options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// The server did not answer `ping` while connecting.
    #[error("MongoDB ping failed during initial connection (attempt {attempt})")]
    InitialPing {
        attempt: u32,
        #[source]
        source: MongoError,
    },
    /// Periodic `ping` failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// `hello` failed or carried no `localTime`.
    #[error("MongoDB `hello` did not report a usable server time")]
    ServerTime {
        #[source]
        source: Option<MongoError>,
    },
    /// Creating a startup index failed.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    /// Insert or revision-guarded replace failed.
    #[error("failed to save session `{id}`")]
    SaveSession {
        id: String,
        #[source]
        source: MongoError,
    },
    /// Guarded single-player `update_one` failed.
    #[error("failed to update player `{user_id}` of session `{id}`")]
    UpdatePlayer {
        id: String,
        user_id: String,
        #[source]
        source: MongoError,
    },
    /// `find_one` by id failed.
    #[error("failed to load session `{id}`")]
    LoadSession {
        id: String,
        #[source]
        source: MongoError,
    },
    /// `delete_one` by id failed.
    #[error("failed to delete session `{id}`")]
    DeleteSession {
        id: String,
        #[source]
        source: MongoError,
    },
    /// Listing query or cursor failed.
    #[error("failed to list sessions")]
    ListSessions {
        #[source]
        source: MongoError,
    },
}

/// Whether an insert failed because the `_id` is already taken.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}
