//! In-process session store used for development and tests.

use std::{sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;

use crate::dao::{
    models::{PlayerPatch, SessionEntity, SessionListItemEntity},
    session_store::{Revision, SessionStore, Versioned},
    storage::{StorageError, StorageResult},
};

struct StoredSession {
    revision: u64,
    session: SessionEntity,
}

/// [`SessionStore`] keeping documents in a concurrent map with revision counters.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_revision(id: &str, revision: &Revision) -> StorageResult<u64> {
        revision
            .as_str()
            .parse::<u64>()
            .map_err(|_| StorageError::conflict(id))
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            match store.sessions.entry(session.id.clone()) {
                Entry::Occupied(_) => Err(StorageError::conflict(session.id)),
                Entry::Vacant(slot) => {
                    slot.insert(StoredSession {
                        revision: 1,
                        session,
                    });
                    Ok(())
                }
            }
        })
    }

    fn find_session(&self, id: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .sessions
                .get(&id)
                .map(|stored| stored.session.clone()))
        })
    }

    fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionListItemEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .sessions
                .iter()
                .map(|entry| SessionListItemEntity::from(&entry.session))
                .collect())
        })
    }

    fn delete_session(&self, id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.sessions.remove(&id).is_some()) })
    }

    fn load_for_update(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<SessionEntity>>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.sessions.get(&id).map(|stored| Versioned {
                revision: Revision::new(stored.revision.to_string()),
                value: stored.session.clone(),
            }))
        })
    }

    fn commit(
        &self,
        id: String,
        revision: Revision,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let store = self.clone();
        Box::pin(async move {
            let expected = Self::parse_revision(&id, &revision)?;
            let mut stored = store
                .sessions
                .get_mut(&id)
                .ok_or_else(|| StorageError::not_found(&id))?;

            if stored.revision != expected {
                return Err(StorageError::conflict(id));
            }

            stored.revision += 1;
            stored.session = session;
            Ok(Revision::new(stored.revision.to_string()))
        })
    }

    fn update_player(
        &self,
        id: String,
        user_id: String,
        patch: PlayerPatch,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut stored = store
                .sessions
                .get_mut(&id)
                .ok_or_else(|| StorageError::not_found(&id))?;

            stored
                .session
                .apply_player_patch(&user_id, patch)
                .map_err(|source| StorageError::rejected(&id, source))?;
            stored.revision += 1;
            Ok(())
        })
    }

    fn server_time(&self) -> BoxFuture<'static, StorageResult<SystemTime>> {
        Box::pin(async { Ok(SystemTime::now()) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
