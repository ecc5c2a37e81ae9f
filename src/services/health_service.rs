use tracing::warn;

use crate::{
    dto::health::{HealthResponse, HealthStatus},
    state::SharedState,
};

/// Ping the session store and report whether the backend can serve sessions.
///
/// A failed ping only affects this answer; the storage supervisor owns the
/// degraded flag.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let status = match state.require_session_store().await {
        Ok(store) => match store.health_check().await {
            Ok(()) => HealthStatus::Ok,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                HealthStatus::Degraded
            }
        },
        Err(_) => {
            warn!("storage unavailable (degraded mode)");
            HealthStatus::Degraded
        }
    };

    HealthResponse {
        status,
        streamed_sessions: state.channels().len(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::session_store::memory::MemorySessionStore, state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_until_storage_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);

        state
            .install_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        let _rx = state.channels().subscribe("s1");
        let health = health_status(&state).await;
        assert_eq!(health.status, HealthStatus::Ok);
        assert_eq!(health.streamed_sessions, 1);
    }
}
