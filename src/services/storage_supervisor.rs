use std::{future::Future, str::FromStr, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{
        session_store::{SessionStore, memory::MemorySessionStore},
        storage::StorageError,
    },
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Storage backend selected through `STORAGE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process store; the default.
    Memory,
    /// MongoDB, feature `mongo-store`.
    Mongo,
    /// CouchDB, feature `couch-store`.
    Couch,
}

/// Raised when `STORAGE_BACKEND` names an unknown or disabled backend.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Not one of the known backend names.
    #[error("unknown storage backend `{0}` (expected memory, mongo or couch)")]
    Unknown(String),
    /// Known backend whose cargo feature is off.
    #[error("storage backend `{0}` is not compiled in (enable the `{1}` feature)")]
    Disabled(&'static str, &'static str),
}

impl FromStr for StorageBackend {
    type Err = BackendError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "mongo" | "mongodb" => Ok(StorageBackend::Mongo),
            "couch" | "couchdb" => Ok(StorageBackend::Couch),
            other => Err(BackendError::Unknown(other.to_owned())),
        }
    }
}

impl StorageBackend {
    /// Read `STORAGE_BACKEND`, defaulting to the in-memory store.
    pub fn from_env() -> Result<Self, BackendError> {
        let backend = match std::env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => StorageBackend::Memory,
        };
        backend.ensure_enabled()?;
        Ok(backend)
    }

    fn ensure_enabled(self) -> Result<(), BackendError> {
        match self {
            StorageBackend::Mongo if !cfg!(feature = "mongo-store") => {
                Err(BackendError::Disabled("mongo", "mongo-store"))
            }
            StorageBackend::Couch if !cfg!(feature = "couch-store") => {
                Err(BackendError::Disabled("couch", "couch-store"))
            }
            _ => Ok(()),
        }
    }

    /// Build the connect closure handed to [`run`].
    ///
    /// The in-memory store is created once so reconnects keep its sessions.
    pub fn connector(
        self,
    ) -> impl FnMut() -> BoxFuture<'static, Result<Arc<dyn SessionStore>, StorageError>>
    + Send
    + 'static {
        let memory = MemorySessionStore::new();
        move || {
            let memory = memory.clone();
            Box::pin(async move {
                match self {
                    StorageBackend::Memory => Ok(Arc::new(memory) as Arc<dyn SessionStore>),
                    StorageBackend::Mongo => connect_mongo().await,
                    StorageBackend::Couch => connect_couch().await,
                }
            })
        }
    }
}

#[cfg(feature = "mongo-store")]
async fn connect_mongo() -> Result<Arc<dyn SessionStore>, StorageError> {
    use crate::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

    let config = MongoConfig::from_env().await?;
    let store = MongoSessionStore::connect(config).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "mongo-store"))]
async fn connect_mongo() -> Result<Arc<dyn SessionStore>, StorageError> {
    let err = BackendError::Disabled("mongo", "mongo-store");
    Err(StorageError::unavailable(err.to_string(), err))
}

#[cfg(feature = "couch-store")]
async fn connect_couch() -> Result<Arc<dyn SessionStore>, StorageError> {
    use crate::dao::session_store::couchdb::{CouchConfig, CouchSessionStore};

    let config = CouchConfig::from_env()?;
    let store = CouchSessionStore::connect(config).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "couch-store"))]
async fn connect_couch() -> Result<Arc<dyn SessionStore>, StorageError> {
    let err = BackendError::Disabled("couch", "couch-store");
    Err(StorageError::unavailable(err.to_string(), err))
}

/// Reconnect to the storage backend and keep the shared state in degraded mode when it is unavailable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_session_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if state.is_degraded() {
                                info!("storage healthy again; leaving degraded mode");
                                state.update_degraded(false);
                            }
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(health_err) => {
                            warn!(error = %health_err, "storage health check failed");
                            if reconnect(&state, store.as_ref()).await {
                                state.update_degraded(false);
                                sleep(HEALTH_POLL_INTERVAL).await;
                            } else {
                                warn!(
                                    "exhausted storage reconnect attempts; staying in degraded mode"
                                );
                                state.clear_session_store().await;
                                break;
                            }
                        }
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

async fn reconnect(state: &SharedState, store: &dyn SessionStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!("storage reconnection succeeded after health check failure");
                return true;
            }
            Err(reconnect_err) => {
                if attempt == 0 {
                    warn!(
                        attempt, error = %reconnect_err,
                        "storage reconnect first attempt failed; entering degraded mode"
                    );
                    state.update_degraded(true);
                } else {
                    warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, dao::models::fixtures, state::AppState};

    #[test]
    fn backend_names_are_parsed_leniently() {
        assert_eq!("memory".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert_eq!(" MongoDB ".parse::<StorageBackend>(), Ok(StorageBackend::Mongo));
        assert_eq!("couch".parse::<StorageBackend>(), Ok(StorageBackend::Couch));
        assert_eq!(
            "redis".parse::<StorageBackend>(),
            Err(BackendError::Unknown("redis".into()))
        );
    }

    #[tokio::test]
    async fn memory_connector_keeps_sessions_across_reconnects() {
        let mut connect = StorageBackend::Memory.connector();
        let first = connect().await.unwrap();
        first
            .create_session(fixtures::session("s1", vec![]))
            .await
            .unwrap();

        let second = connect().await.unwrap();
        assert!(second.find_session("s1".into()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn supervisor_leaves_degraded_mode_once_connected() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        let task = tokio::spawn(run(state.clone(), StorageBackend::Memory.connector()));

        tokio::time::timeout(Duration::from_secs(1), watcher.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!state.is_degraded());
        assert!(state.session_store().await.is_some());
        task.abort();
    }
}
