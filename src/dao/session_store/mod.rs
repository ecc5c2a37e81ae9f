/// CouchDB backend using native `_rev` revisions.
#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
/// MongoDB backend using a `revision` counter.
#[cfg(feature = "mongo-store")]
pub mod mongodb;
pub mod transaction;

use std::{fmt, time::SystemTime};

use futures::future::BoxFuture;

use crate::dao::models::{PlayerPatch, SessionEntity, SessionListItemEntity};
use crate::dao::storage::StorageResult;

/// Opaque document revision used for optimistic concurrency control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    /// Wrap a backend-specific revision token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Backend-specific revision token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document together with the revision it was read at.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    /// Revision to hand back to [`SessionStore::commit`].
    pub revision: Revision,
    /// The document as read.
    pub value: T,
}

/// Abstraction over the persistence layer for session documents.
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Fails with a conflict if the id is taken.
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Plain, non-transactional point read.
    fn find_session(&self, id: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Summaries of every stored session.
    fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionListItemEntity>>>;
    /// Remove a session; `false` when it did not exist.
    fn delete_session(&self, id: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// Read a session together with its current revision.
    fn load_for_update(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<SessionEntity>>>>;
    /// Replace the session if it is still at `revision`, returning the new revision.
    /// Fails with [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict)
    /// when another write happened in between.
    fn commit(
        &self,
        id: String,
        revision: Revision,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<Revision>>;
    /// Merge a patch into a single player's subtree.
    fn update_player(
        &self,
        id: String,
        user_id: String,
        patch: PlayerPatch,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Write timestamp as seen by the storage server.
    fn server_time(&self) -> BoxFuture<'static, StorageResult<SystemTime>>;
    /// Cheap round trip used by the storage supervisor.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
