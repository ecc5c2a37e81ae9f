//! Transactional read-modify-write on top of [`SessionStore`] revisions.
//!
//! The closure sees a consistent snapshot of the session and decides whether
//! to write. The commit only lands if nobody else wrote the document since the
//! snapshot was read; otherwise the closure is re-run on a fresh snapshot.

use std::time::SystemTime;

use tokio::time::sleep;
use tracing::debug;

use crate::dao::{
    models::SessionEntity,
    retry::RetryPolicy,
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

/// Result of a transaction whose write either landed or was skipped by the closure.
#[derive(Debug, Clone)]
pub enum TxOutcome<T, S> {
    /// The closure returned `Ok` and the mutated session was committed.
    Committed { value: T, session: SessionEntity },
    /// The closure returned `Err`; nothing was written.
    Skipped { reason: S, session: SessionEntity },
}

impl<T, S> TxOutcome<T, S> {
    /// Whether the write landed.
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed { .. })
    }

    /// Session as committed, or as observed when the write was skipped.
    pub fn session(&self) -> &SessionEntity {
        match self {
            TxOutcome::Committed { session, .. } | TxOutcome::Skipped { session, .. } => session,
        }
    }
}

/// Run `mutate` against the latest snapshot of session `id` and commit it atomically.
///
/// `mutate` receives the snapshot and the storage server's current time. It may
/// run several times when commits race, so it must not have side effects beyond
/// the session it is handed. A missing session yields [`StorageError::NotFound`].
pub async fn run_transaction<T, S, F>(
    store: &dyn SessionStore,
    id: &str,
    mut mutate: F,
) -> StorageResult<TxOutcome<T, S>>
where
    F: FnMut(&mut SessionEntity, SystemTime) -> Result<T, S> + Send,
{
    let policy = RetryPolicy::CONTENTION;
    let mut attempt = 1;

    loop {
        match attempt_once(store, id, &mut mutate).await {
            Err(err) if err.is_conflict() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(session_id = %id, attempt, "transaction lost a commit race; retrying");
                sleep(delay).await;
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

async fn attempt_once<T, S, F>(
    store: &dyn SessionStore,
    id: &str,
    mutate: &mut F,
) -> StorageResult<TxOutcome<T, S>>
where
    F: FnMut(&mut SessionEntity, SystemTime) -> Result<T, S> + Send,
{
    let snapshot = store
        .load_for_update(id.to_owned())
        .await?
        .ok_or_else(|| StorageError::not_found(id))?;
    let now = store.server_time().await?;

    let mut session = snapshot.value;
    match mutate(&mut session, now) {
        Ok(value) => {
            store
                .commit(id.to_owned(), snapshot.revision, session.clone())
                .await?;
            Ok(TxOutcome::Committed { value, session })
        }
        Err(reason) => Ok(TxOutcome::Skipped { reason, session }),
    }
}
