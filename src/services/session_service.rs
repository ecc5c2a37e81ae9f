//! Session lifecycle around the phase state machine: creation, player
//! submissions, grading callbacks and presence.

use indexmap::IndexMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            ConnectionStatus, CoordinationEntity, Phase, PhaseDataEntity, PlayerPatch,
            SessionConfigEntity, SessionEntity, SessionPlayerEntity, SessionStatus,
            SessionTimingEntity,
        },
        session_store::transaction::run_transaction,
    },
    dto::{
        phase::{MAX_TEXT_LEN, SubmitPhaseRequest, SubmitPhaseResponse},
        session::{CreateSessionRequest, SessionListItem, SessionView},
    },
    error::ServiceError,
    services::{phase_service, sse_events},
    state::{SharedState, durations::aggregate_rank, readiness, state_machine},
};

/// Persist a new session in the forming state.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<SessionView, ServiceError> {
    let store = state.require_session_store().await?;
    let id = request
        .id
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let players: IndexMap<String, SessionPlayerEntity> = request
        .players
        .into_iter()
        .map(|input| (input.user_id.clone(), input.into()))
        .collect();
    let rank = aggregate_rank(players.values());
    let phase_duration = state
        .config()
        .durations()
        .duration_for(rank.as_deref(), Phase::Writing);
    let now = store.server_time().await?;

    let session = SessionEntity {
        id: id.clone(),
        match_id: request.match_id,
        mode: request.mode,
        config: SessionConfigEntity {
            writing_trait: request.writing_trait,
            prompt_id: request.prompt_id,
            prompt_type: request.prompt_type,
            phase: Phase::Writing,
            phase_duration,
        },
        players,
        state: SessionStatus::Forming,
        timing: SessionTimingEntity::default(),
        coordination: CoordinationEntity::default(),
        created_at: now,
        updated_at: now,
    };

    store
        .create_session(session.clone())
        .await
        .map_err(|err| {
            if err.is_conflict() {
                ServiceError::InvalidState(format!("session `{id}` already exists"))
            } else {
                err.into()
            }
        })?;

    info!(
        session_id = %id,
        players = session.players.len(),
        aggregate_rank = ?rank,
        phase_duration,
        "session created"
    );
    Ok(session.into())
}

/// Fetch a session snapshot.
pub async fn get_session(state: &SharedState, session_id: &str) -> Result<SessionView, ServiceError> {
    let store = state.require_session_store().await?;
    store
        .find_session(session_id.to_owned())
        .await?
        .map(Into::into)
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}`")))
}

/// List stored sessions.
pub async fn list_sessions(state: &SharedState) -> Result<Vec<SessionListItem>, ServiceError> {
    let store = state.require_session_store().await?;
    let sessions = store.list_sessions().await?;
    Ok(sessions.into_iter().map(Into::into).collect())
}

/// Delete a session and close its event stream.
pub async fn delete_session(state: &SharedState, session_id: &str) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    if !store.delete_session(session_id.to_owned()).await? {
        return Err(ServiceError::NotFound(format!("session `{session_id}`")));
    }
    state.channels().close(session_id);
    info!(session_id, "session deleted");
    Ok(())
}

/// Record a player's submission for the running phase.
///
/// Only `players.<user_id>.phases.phase<N>` is written, so concurrent
/// submissions of different players never contend. The shared coordination
/// counters are refreshed afterwards and, with auto-advance enabled, the
/// session moves on once the last real player submitted.
pub async fn submit_phase(
    state: &SharedState,
    session_id: &str,
    user_id: &str,
    phase: Phase,
    request: SubmitPhaseRequest,
) -> Result<SubmitPhaseResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let snapshot = store
        .find_session(session_id.to_owned())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}`")))?;

    if !snapshot.players.contains_key(user_id) {
        return Err(ServiceError::NotFound(format!(
            "player `{user_id}` in session `{session_id}`"
        )));
    }
    if !snapshot.accepts_submission(phase) {
        return Err(ServiceError::InvalidState(format!(
            "phase {phase} is not open for submissions (session is {:?} in phase {})",
            snapshot.state, snapshot.config.phase
        )));
    }

    let mut data = phase_payload(phase, request)?;
    data.submitted_at = Some(store.server_time().await?);
    let word_count = data.word_count;

    store
        .update_player(
            session_id.to_owned(),
            user_id.to_owned(),
            PlayerPatch::Submit { phase, data },
        )
        .await?;
    info!(session_id, user_id, %phase, word_count, "phase submitted");
    sse_events::broadcast_player_submitted(state, session_id, user_id, phase, word_count);

    // The submission already landed; a failed refresh only leaves the
    // stored counters stale, so count from a plain read instead.
    let session = match refresh_coordination(state, session_id).await {
        Ok(session) => session,
        Err(err) => {
            warn!(session_id, error = %err, "failed to refresh coordination after submission");
            store
                .find_session(session_id.to_owned())
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}`")))?
        }
    };
    let ready_count = readiness::ready_count(&session, phase);

    let transitioned = if state.config().auto_advance() {
        phase_service::check_and_transition(state, session_id, phase).await?
    } else {
        false
    };

    Ok(SubmitPhaseResponse {
        phase: phase.number(),
        word_count,
        ready_count,
        transitioned,
    })
}

/// Attach a grading score to a submitted phase.
pub async fn record_score(
    state: &SharedState,
    session_id: &str,
    user_id: &str,
    phase: Phase,
    score: f64,
) -> Result<(), ServiceError> {
    if !(0.0..=100.0).contains(&score) {
        return Err(ServiceError::InvalidInput(format!(
            "score must be between 0 and 100 (got {score})"
        )));
    }

    let store = state.require_session_store().await?;
    store
        .update_player(
            session_id.to_owned(),
            user_id.to_owned(),
            PlayerPatch::Score { phase, score },
        )
        .await?;
    info!(session_id, user_id, %phase, score, "phase score recorded");

    if let Ok(Some(session)) = store.find_session(session_id.to_owned()).await {
        sse_events::broadcast_session_updated(state, &session);
    }
    Ok(())
}

/// Mark a player connected and refresh their heartbeat.
pub async fn heartbeat(
    state: &SharedState,
    session_id: &str,
    user_id: &str,
    connection_id: Option<String>,
) -> Result<(), ServiceError> {
    update_presence(state, session_id, user_id, ConnectionStatus::Connected, connection_id).await?;
    debug!(session_id, user_id, "heartbeat");
    Ok(())
}

/// Mark a player disconnected.
pub async fn disconnect(
    state: &SharedState,
    session_id: &str,
    user_id: &str,
) -> Result<(), ServiceError> {
    update_presence(state, session_id, user_id, ConnectionStatus::Disconnected, None).await?;
    info!(session_id, user_id, "player disconnected");

    let store = state.require_session_store().await?;
    if let Ok(Some(session)) = store.find_session(session_id.to_owned()).await {
        sse_events::broadcast_session_updated(state, &session);
    }
    Ok(())
}

async fn update_presence(
    state: &SharedState,
    session_id: &str,
    user_id: &str,
    status: ConnectionStatus,
    connection_id: Option<String>,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let at = store.server_time().await?;
    store
        .update_player(
            session_id.to_owned(),
            user_id.to_owned(),
            PlayerPatch::Presence {
                status,
                at,
                connection_id,
            },
        )
        .await?;
    Ok(())
}

/// Recompute `ready_count` and the active/waiting state from the latest snapshot.
async fn refresh_coordination(
    state: &SharedState,
    session_id: &str,
) -> Result<SessionEntity, ServiceError> {
    let store = state.require_session_store().await?;
    let outcome = run_transaction(store.as_ref(), session_id, |session, now| {
        if state_machine::sync_coordination(session, now) {
            Ok(())
        } else {
            Err(())
        }
    })
    .await?;

    if outcome.is_committed() {
        sse_events::broadcast_session_updated(state, outcome.session());
    }
    Ok(outcome.session().clone())
}

/// Validate a submission payload against what `phase` expects.
fn phase_payload(phase: Phase, request: SubmitPhaseRequest) -> Result<PhaseDataEntity, ServiceError> {
    let mut data = PhaseDataEntity {
        submitted: true,
        ..PhaseDataEntity::default()
    };

    match phase {
        Phase::Writing | Phase::Revision => {
            let content = request
                .content
                .filter(|content| !content.trim().is_empty())
                .ok_or_else(|| {
                    ServiceError::InvalidInput(format!("phase {phase} requires essay content"))
                })?;
            data.word_count = word_count(&content);
            data.content = Some(content);
        }
        Phase::PeerFeedback => {
            let responses = request
                .responses
                .filter(|responses| !responses.is_empty())
                .ok_or_else(|| {
                    ServiceError::InvalidInput(format!("phase {phase} requires feedback responses"))
                })?;
            if let Some((question, _)) = responses
                .iter()
                .find(|(_, answer)| answer.len() > MAX_TEXT_LEN)
            {
                return Err(ServiceError::InvalidInput(format!(
                    "response to `{question}` exceeds {MAX_TEXT_LEN} bytes"
                )));
            }
            data.word_count = responses.values().map(|answer| word_count(answer)).sum();
            data.responses = Some(responses);
        }
    }

    Ok(data)
}

fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::SystemTime};

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::SessionListItemEntity,
            session_store::{Revision, SessionStore, Versioned, memory::MemorySessionStore},
            storage::{StorageError, StorageResult},
        },
        dto::session::PlayerInput,
        state::AppState,
    };

    /// Store whose transactional commits always lose the race.
    struct ContendedStore {
        inner: MemorySessionStore,
    }

    impl SessionStore for ContendedStore {
        fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.create_session(session)
        }
        fn find_session(&self, id: String) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
            self.inner.find_session(id)
        }
        fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionListItemEntity>>> {
            self.inner.list_sessions()
        }
        fn delete_session(&self, id: String) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.delete_session(id)
        }
        fn load_for_update(
            &self,
            id: String,
        ) -> BoxFuture<'static, StorageResult<Option<Versioned<SessionEntity>>>> {
            self.inner.load_for_update(id)
        }
        fn commit(
            &self,
            id: String,
            _revision: Revision,
            _session: SessionEntity,
        ) -> BoxFuture<'static, StorageResult<Revision>> {
            Box::pin(async move { Err(StorageError::conflict(id)) })
        }
        fn update_player(
            &self,
            id: String,
            user_id: String,
            patch: PlayerPatch,
        ) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.update_player(id, user_id, patch)
        }
        fn server_time(&self) -> BoxFuture<'static, StorageResult<SystemTime>> {
            self.inner.server_time()
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }
        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    fn player(user_id: &str, rank: Option<&str>, is_ai: bool) -> PlayerInput {
        PlayerInput {
            user_id: user_id.into(),
            display_name: user_id.to_uppercase(),
            avatar: None,
            rank: rank.map(str::to_owned),
            is_ai,
        }
    }

    fn create_request(players: Vec<PlayerInput>) -> CreateSessionRequest {
        CreateSessionRequest {
            id: Some("s1".into()),
            match_id: "match-1".into(),
            mode: crate::dao::models::SessionMode::Ranked,
            writing_trait: "organization".into(),
            prompt_id: "prompt-1".into(),
            prompt_type: "narrative".into(),
            players,
        }
    }

    fn essay(text: &str) -> SubmitPhaseRequest {
        SubmitPhaseRequest {
            content: Some(text.into()),
            responses: None,
        }
    }

    fn feedback() -> SubmitPhaseRequest {
        SubmitPhaseRequest {
            content: None,
            responses: Some(IndexMap::from([
                ("strengths".to_owned(), "clear thesis statement".to_owned()),
                ("improvements".to_owned(), "add evidence".to_owned()),
            ])),
        }
    }

    async fn started_session(config: AppConfig) -> (SharedState, MemorySessionStore) {
        let store = MemorySessionStore::new();
        let state = AppState::with_store(config, Arc::new(store.clone())).await;
        create_session(
            &state,
            create_request(vec![
                player("alice", Some("Platinum"), false),
                player("bob", Some("Bronze III"), false),
                player("bot", Some("Gold"), true),
            ]),
        )
        .await
        .unwrap();
        phase_service::start_session(&state, "s1").await.unwrap();
        (state, store)
    }

    #[tokio::test]
    async fn create_uses_aggregate_rank_for_phase_one() {
        let store = MemorySessionStore::new();
        let state = AppState::with_store(AppConfig::default(), Arc::new(store)).await;

        let view = create_session(
            &state,
            create_request(vec![
                player("alice", Some("Platinum"), false),
                player("bob", Some("Bronze III"), false),
                player("bot", Some("Gold"), true),
            ]),
        )
        .await
        .unwrap();

        // Sorted real ranks: "Bronze III", "Platinum" -> index 1 -> Platinum (360s)
        assert_eq!(view.config.phase_duration, 360);
        assert_eq!(view.state, SessionStatus::Forming);

        let err = create_session(&state, create_request(vec![player("carol", None, false)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn create_without_ranks_uses_default_duration() {
        let state = AppState::with_store(
            AppConfig::default(),
            Arc::new(MemorySessionStore::new()),
        )
        .await;
        let mut request = create_request(vec![player("alice", None, false)]);
        request.id = None;

        let view = create_session(&state, request).await.unwrap();
        assert_eq!(view.config.phase_duration, 300);
        assert_eq!(view.id.len(), 32);
    }

    #[tokio::test]
    async fn submissions_drive_waiting_state_and_auto_advance() {
        let (state, store) = started_session(AppConfig::default()).await;

        let first = submit_phase(&state, "s1", "alice", Phase::Writing, essay("one two three"))
            .await
            .unwrap();
        assert_eq!(first.word_count, 3);
        assert_eq!(first.ready_count, 1);
        assert!(!first.transitioned);
        let session = store.find_session("s1".into()).await.unwrap().unwrap();
        assert_eq!(session.state, SessionStatus::Waiting);
        assert_eq!(session.coordination.ready_count, 1);

        let second = submit_phase(&state, "s1", "bob", Phase::Writing, essay("four"))
            .await
            .unwrap();
        assert!(second.transitioned);

        let session = store.find_session("s1".into()).await.unwrap().unwrap();
        assert_eq!(session.config.phase, Phase::PeerFeedback);
        assert_eq!(session.state, SessionStatus::Active);
        assert_eq!(session.coordination.ready_count, 0);
    }

    #[tokio::test]
    async fn ready_count_survives_a_failed_coordination_refresh() {
        let (_, inner) = started_session(AppConfig::default()).await;
        let state = AppState::with_store(
            AppConfig::default(),
            Arc::new(ContendedStore {
                inner: inner.clone(),
            }),
        )
        .await;

        let response = submit_phase(&state, "s1", "alice", Phase::Writing, essay("one two"))
            .await
            .unwrap();
        assert_eq!(response.ready_count, 1);
        assert!(!response.transitioned);

        let session = inner.find_session("s1".into()).await.unwrap().unwrap();
        assert!(session.players["alice"].phases.get(Phase::Writing).unwrap().submitted);
        // Stored counters stay stale since every commit conflicted.
        assert_eq!(session.coordination.ready_count, 0);
    }

    #[tokio::test]
    async fn manual_mode_leaves_transition_to_the_caller() {
        let (state, store) = started_session(AppConfig::default().with_auto_advance(false)).await;

        for user in ["alice", "bob"] {
            let response = submit_phase(&state, "s1", user, Phase::Writing, essay("draft"))
                .await
                .unwrap();
            assert!(!response.transitioned);
        }

        let session = store.find_session("s1".into()).await.unwrap().unwrap();
        assert_eq!(session.config.phase, Phase::Writing);
        assert!(session.coordination.all_players_ready);
        assert!(
            phase_service::check_and_transition(&state, "s1", Phase::Writing)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn submission_rules_are_enforced() {
        let (state, _) = started_session(AppConfig::default()).await;

        let err = submit_phase(&state, "s1", "alice", Phase::PeerFeedback, feedback())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let err = submit_phase(&state, "s1", "alice", Phase::Writing, feedback())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let err = submit_phase(&state, "s1", "ghost", Phase::Writing, essay("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        submit_phase(&state, "s1", "alice", Phase::Writing, essay("hi"))
            .await
            .unwrap();
        let err = submit_phase(&state, "s1", "alice", Phase::Writing, essay("again"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn feedback_phase_counts_words_across_responses() {
        let (state, _) = started_session(AppConfig::default()).await;
        for user in ["alice", "bob"] {
            submit_phase(&state, "s1", user, Phase::Writing, essay("draft"))
                .await
                .unwrap();
        }

        let response = submit_phase(&state, "s1", "alice", Phase::PeerFeedback, feedback())
            .await
            .unwrap();
        assert_eq!(response.word_count, 5);
    }

    #[tokio::test]
    async fn forming_session_rejects_submissions() {
        let state = AppState::with_store(
            AppConfig::default(),
            Arc::new(MemorySessionStore::new()),
        )
        .await;
        create_session(&state, create_request(vec![player("alice", None, false)]))
            .await
            .unwrap();

        let err = submit_phase(&state, "s1", "alice", Phase::Writing, essay("early"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn scores_and_presence_patch_only_the_player() {
        let (state, store) = started_session(AppConfig::default().with_auto_advance(false)).await;

        let err = record_score(&state, "s1", "alice", Phase::Writing, 90.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        submit_phase(&state, "s1", "alice", Phase::Writing, essay("essay"))
            .await
            .unwrap();
        record_score(&state, "s1", "alice", Phase::Writing, 90.0)
            .await
            .unwrap();
        assert!(matches!(
            record_score(&state, "s1", "alice", Phase::Writing, 101.0).await,
            Err(ServiceError::InvalidInput(_))
        ));

        disconnect(&state, "s1", "bob").await.unwrap();
        heartbeat(&state, "s1", "alice", Some("conn-1".into()))
            .await
            .unwrap();

        let session = store.find_session("s1".into()).await.unwrap().unwrap();
        let alice = &session.players["alice"];
        assert_eq!(alice.phases.get(Phase::Writing).unwrap().score, Some(90.0));
        assert_eq!(alice.connection_id.as_deref(), Some("conn-1"));
        assert!(alice.last_heartbeat.is_some());
        assert_eq!(session.players["bob"].status, ConnectionStatus::Disconnected);
        assert_eq!(session.config.phase, Phase::Writing);
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let (state, _) = started_session(AppConfig::default()).await;
        assert_eq!(list_sessions(&state).await.unwrap().len(), 1);

        delete_session(&state, "s1").await.unwrap();
        assert!(matches!(
            get_session(&state, "s1").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            delete_session(&state, "s1").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
