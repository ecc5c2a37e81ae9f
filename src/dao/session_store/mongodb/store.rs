use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Client, Collection, Database, bson::doc, options::IndexOptions};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{MongoSessionDocument, PlayerUpdate, doc_id},
};
use crate::dao::{
    models::{PlayerPatch, SessionEntity, SessionListItemEntity},
    retry::{RetryPolicy, with_backoff},
    session_store::{Revision, SessionStore, Versioned},
    storage::{StorageError, StorageResult},
};

const SESSION_COLLECTION_NAME: &str = "sessions";

/// [`SessionStore`] backed by a MongoDB collection with a revision counter per document.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"match_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_match_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "match_id",
                source,
            })?;
        Ok(())
    }

    async fn collection(&self) -> Collection<MongoSessionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn find_document(&self, id: &str) -> MongoResult<Option<MongoSessionDocument>> {
        self.collection()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadSession {
                id: id.to_owned(),
                source,
            })
    }

    async fn create_session(&self, session: SessionEntity) -> StorageResult<()> {
        let id = session.id.clone();
        let document = MongoSessionDocument::new(session, 1);
        match self.collection().await.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StorageError::conflict(id)),
            Err(source) => Err(MongoDaoError::SaveSession { id, source }.into()),
        }
    }

    async fn list_sessions(&self) -> MongoResult<Vec<SessionListItemEntity>> {
        let documents: Vec<MongoSessionDocument> = self
            .collection()
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListSessions { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListSessions { source })?;

        Ok(documents
            .iter()
            .map(|document| SessionListItemEntity::from(&document.session))
            .collect())
    }

    async fn delete_session(&self, id: String) -> MongoResult<bool> {
        let result = self
            .collection()
            .await
            .delete_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::DeleteSession { id, source })?;
        Ok(result.deleted_count > 0)
    }

    async fn commit(
        &self,
        id: String,
        revision: Revision,
        session: SessionEntity,
    ) -> StorageResult<Revision> {
        let expected: i64 = revision
            .as_str()
            .parse()
            .map_err(|_| StorageError::conflict(&id))?;
        let document = MongoSessionDocument::new(session, expected + 1);

        let result = self
            .collection()
            .await
            .replace_one(doc! {"_id": id.as_str(), "revision": expected}, &document)
            .await
            .map_err(|source| MongoDaoError::SaveSession {
                id: id.clone(),
                source,
            })?;

        if result.matched_count > 0 {
            return Ok(Revision::new((expected + 1).to_string()));
        }
        match self.find_document(&id).await? {
            Some(_) => Err(StorageError::conflict(id)),
            None => Err(StorageError::not_found(id)),
        }
    }

    async fn update_player_once(
        &self,
        id: &str,
        user_id: &str,
        patch: &PlayerPatch,
    ) -> StorageResult<()> {
        let PlayerUpdate { filter, update } = PlayerUpdate::new(id, user_id, patch);
        let result = self
            .collection()
            .await
            .update_one(filter, update)
            .await
            .map_err(|source| MongoDaoError::UpdatePlayer {
                id: id.to_owned(),
                user_id: user_id.to_owned(),
                source,
            })?;

        if result.matched_count > 0 {
            return Ok(());
        }

        // The guard did not match: find out whether the patch itself is invalid.
        let mut session = self
            .find_document(id)
            .await?
            .ok_or_else(|| StorageError::not_found(id))?
            .session;
        match session.apply_player_patch(user_id, patch.clone()) {
            Err(source) => Err(StorageError::rejected(id, source)),
            Ok(()) => {
                debug!(session_id = id, user_id, "player patch guard raced; retrying");
                Err(StorageError::conflict(id))
            }
        }
    }

    async fn server_time(&self) -> MongoResult<SystemTime> {
        let database = self.inner.state.read().await.database.clone();
        let hello = database
            .run_command(doc! { "hello": 1 })
            .await
            .map_err(|source| MongoDaoError::ServerTime {
                source: Some(source),
            })?;
        hello
            .get_datetime("localTime")
            .map(|local_time| local_time.to_system_time())
            .map_err(|_| MongoDaoError::ServerTime { source: None })
    }
}

impl SessionStore for MongoSessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_session(session).await })
    }

    fn find_session(&self, id: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.find_document(&id).await?;
            Ok(document.map(|document| document.session))
        })
    }

    fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionListItemEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_sessions().await.map_err(Into::into) })
    }

    fn delete_session(&self, id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_session(id).await.map_err(Into::into) })
    }

    fn load_for_update(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<SessionEntity>>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.find_document(&id).await?;
            Ok(document.map(|document| Versioned {
                revision: Revision::new(document.revision.to_string()),
                value: document.session,
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
        Box::pin(async move { store.commit(id, revision, session).await })
    }

    fn update_player(
        &self,
        id: String,
        user_id: String,
        patch: PlayerPatch,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            with_backoff(RetryPolicy::CONTENTION, StorageError::is_conflict, |_| {
                store.update_player_once(&id, &user_id, &patch)
            })
            .await
        })
    }

    fn server_time(&self) -> BoxFuture<'static, StorageResult<SystemTime>> {
        let store = self.clone();
        Box::pin(async move { store.server_time().await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
