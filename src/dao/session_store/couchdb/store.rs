use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode, header::DATE};
use serde_json::from_value;
use time::{OffsetDateTime, format_description::well_known::Rfc2822};
use tracing::warn;

use crate::dao::{
    models::{PlayerPatch, SessionEntity, SessionListItemEntity},
    retry::{RetryPolicy, with_backoff},
    session_store::{Revision, SessionStore, Versioned},
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchSessionDocument, END_SUFFIX, SESSION_PREFIX, WriteResponse,
        session_doc_id,
    },
};

/// [`SessionStore`] backed by a CouchDB database, using `_rev` for optimistic concurrency.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchSessionStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url);
        let database = Arc::<str>::from(config.database_name);
        let auth = config
            .credentials
            .map(|(user, pass)| (Arc::<str>::from(user), Arc::<str>::from(pass)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorized(self.client.request(method, url))
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::EnsureDatabase {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorized(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::EnsureDatabase {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn find_document(&self, id: &str) -> CouchResult<Option<CouchSessionDocument>> {
        let response = self
            .request(Method::GET, &session_doc_id(id))
            .send()
            .await
            .map_err(|source| CouchDaoError::LoadSession {
                id: id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchSessionDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeSession {
                    id: id.to_owned(),
                    source,
                }),
            other => Err(CouchDaoError::SessionStatus {
                id: id.to_owned(),
                status: other,
            }),
        }
    }

    /// Write a session document; a stale or missing `_rev` yields [`CouchDaoError::Conflict`].
    async fn put_session(&self, document: &CouchSessionDocument) -> CouchResult<Revision> {
        let id = &document.session.id;
        let response = self
            .request(Method::PUT, &document.id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::SaveSession {
                id: id.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict { id: id.clone() }),
            status if status.is_success() => {
                let written = response.json::<WriteResponse>().await.map_err(|source| {
                    CouchDaoError::DecodeSession {
                        id: id.clone(),
                        source,
                    }
                })?;
                Ok(Revision::new(written.rev))
            }
            other => Err(CouchDaoError::SessionStatus {
                id: id.clone(),
                status: other,
            }),
        }
    }

    async fn list_sessions(&self) -> CouchResult<Vec<SessionListItemEntity>> {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", SESSION_PREFIX)),
            ("endkey", format!("\"{}{}\"", SESSION_PREFIX, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::ListSessions { source })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::ListStatus {
                status: response.status(),
            });
        }

        let payload = response
            .json::<AllDocsResponse>()
            .await
            .map_err(|source| CouchDaoError::ListSessions { source })?;

        let mut sessions = Vec::new();
        for row in payload.rows {
            if let Some(doc) = row.doc {
                let document: CouchSessionDocument =
                    from_value(doc).map_err(|source| CouchDaoError::DecodeListedSession {
                        doc_id: row.id,
                        source,
                    })?;
                sessions.push(SessionListItemEntity::from(&document.session));
            }
        }

        Ok(sessions)
    }

    async fn delete_session(&self, id: &str) -> CouchResult<bool> {
        let Some(document) = self.find_document(id).await? else {
            return Ok(false);
        };
        let Some(rev) = document.rev else {
            return Ok(false);
        };

        let response = self
            .request(Method::DELETE, &document.id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::DeleteSession {
                id: id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict { id: id.to_owned() }),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::SessionStatus {
                id: id.to_owned(),
                status: other,
            }),
        }
    }

    /// Read-modify-write of one player; the `_rev` check makes it atomic.
    async fn update_player_once(
        &self,
        id: &str,
        user_id: &str,
        patch: &PlayerPatch,
    ) -> StorageResult<()> {
        let mut document = self
            .find_document(id)
            .await?
            .ok_or_else(|| StorageError::not_found(id))?;
        document
            .session
            .apply_player_patch(user_id, patch.clone())
            .map_err(|source| StorageError::rejected(id, source))?;
        self.put_session(&document).await?;
        Ok(())
    }

    async fn server_time(&self) -> CouchResult<SystemTime> {
        let url = format!("{}/", self.base_url);
        let response = self
            .authorized(self.client.head(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::ServerTime { source })?;

        let date = response
            .headers()
            .get(DATE)
            .and_then(|value| value.to_str().ok());
        Ok(match date.and_then(parse_http_date) {
            Some(at) => at,
            None => {
                warn!(?date, "CouchDB response carried no usable Date header; using local time");
                SystemTime::now()
            }
        })
    }
}

/// Parse an HTTP `Date` header (`Tue, 15 Nov 1994 08:12:31 GMT`).
fn parse_http_date(value: &str) -> Option<SystemTime> {
    OffsetDateTime::parse(value, &Rfc2822)
        .ok()
        .map(SystemTime::from)
}

impl SessionStore for CouchSessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .put_session(&CouchSessionDocument::new(session, None))
                .await?;
            Ok(())
        })
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
        Box::pin(async move { store.delete_session(&id).await.map_err(Into::into) })
    }

    fn load_for_update(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<SessionEntity>>>> {
        let store = self.clone();
        Box::pin(async move {
            let Some(document) = store.find_document(&id).await? else {
                return Ok(None);
            };
            let revision = document
                .rev
                .map(Revision::new)
                .ok_or_else(|| StorageError::conflict(&id))?;
            Ok(Some(Versioned {
                revision,
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
        Box::pin(async move {
            let document = CouchSessionDocument::new(session, Some(revision.as_str().to_owned()));
            match store.put_session(&document).await {
                Ok(revision) => Ok(revision),
                Err(CouchDaoError::Conflict { .. }) => {
                    if store.find_document(&id).await?.is_some() {
                        Err(StorageError::conflict(id))
                    } else {
                        Err(StorageError::not_found(id))
                    }
                }
                Err(err) => Err(err.into()),
            }
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
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorized(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::HealthCheck {
                    database: store.database.to_string(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::DatabaseStatus {
                    database: store.database.to_string(),
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn http_dates_are_parsed_as_utc() {
        let parsed = parse_http_date("Tue, 15 Nov 1994 08:12:31 GMT").unwrap();
        assert_eq!(parsed, UNIX_EPOCH + Duration::from_secs(784_887_151));
    }

    #[test]
    fn garbage_dates_are_ignored() {
        assert!(parse_http_date("yesterday").is_none());
    }
}
