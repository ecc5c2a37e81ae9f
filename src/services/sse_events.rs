use serde::Serialize;
use tracing::warn;

use crate::{
    dao::models::{Phase, SessionEntity},
    dto::{
        format_system_time,
        session::SessionView,
        sse::{PhaseChangedEvent, PlayerSubmittedEvent, ServerEvent, SystemStatus},
    },
    state::{MatchStage, SharedState},
};

pub(crate) const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_SESSION_UPDATED: &str = "session.updated";
const EVENT_PHASE_CHANGED: &str = "phase.changed";
const EVENT_PLAYER_SUBMITTED: &str = "player.submitted";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Broadcast the full session snapshot to its subscribers.
pub fn broadcast_session_updated(state: &SharedState, session: &SessionEntity) {
    let view = SessionView::from(session.clone());
    send_session_event(state, &session.id, EVENT_SESSION_UPDATED, &view);
}

/// Broadcast that a session left `previous` for its current stage.
pub fn broadcast_phase_changed(state: &SharedState, session: &SessionEntity, previous: MatchStage) {
    let phase = session.config.phase;
    let payload = PhaseChangedEvent {
        session_id: session.id.clone(),
        previous_phase: match previous {
            MatchStage::InPhase(phase) => Some(phase.number()),
            _ => None,
        },
        phase: phase.number(),
        state: session.state,
        phase_duration: session.config.phase_duration,
        phase_start_time: session.timing.start_of(phase).map(format_system_time),
    };
    send_session_event(state, &session.id, EVENT_PHASE_CHANGED, &payload);
}

/// Broadcast that `user_id` submitted `phase`.
pub fn broadcast_player_submitted(
    state: &SharedState,
    session_id: &str,
    user_id: &str,
    phase: Phase,
    word_count: u32,
) {
    let payload = PlayerSubmittedEvent {
        session_id: session_id.to_owned(),
        user_id: user_id.to_owned(),
        phase: phase.number(),
        word_count,
    };
    send_session_event(state, session_id, EVENT_PLAYER_SUBMITTED, &payload);
}

/// Broadcast the degraded flag to every open session stream.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    match ServerEvent::json(EVENT_SYSTEM_STATUS.to_string(), &SystemStatus { degraded }) {
        Ok(event) => state.channels().broadcast_all(event),
        Err(err) => warn!(error = %err, "failed to serialize system status payload"),
    }
}

/// Forward every degraded-mode change to the open session streams.
pub async fn relay_system_status(state: SharedState) {
    let mut watcher = state.degraded_watcher();
    while watcher.changed().await.is_ok() {
        let degraded = *watcher.borrow_and_update();
        broadcast_system_status(&state, degraded);
    }
}

fn send_session_event(state: &SharedState, session_id: &str, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(event.to_string(), payload) {
        Ok(event) => state.channels().broadcast(session_id, event),
        Err(err) => warn!(session_id, event, error = %err, "failed to serialize session SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{models::fixtures, session_store::memory::MemorySessionStore},
        state::AppState,
    };

    #[tokio::test]
    async fn phase_change_reports_previous_phase() {
        let state = AppState::new(AppConfig::default());
        let mut rx = state.channels().subscribe("s1");
        let mut session = fixtures::session("s1", vec![]);
        session.config.phase = Phase::PeerFeedback;

        broadcast_phase_changed(&state, &session, MatchStage::InPhase(Phase::Writing));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_PHASE_CHANGED));
        let payload: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(payload["previous_phase"], 1);
        assert_eq!(payload["phase"], 2);
    }

    #[tokio::test]
    async fn degraded_changes_reach_every_session_stream() {
        let state =
            AppState::with_store(AppConfig::default(), Arc::new(MemorySessionStore::new())).await;
        let mut first = state.channels().subscribe("s1");
        let mut second = state.channels().subscribe("s2");

        let relay = tokio::spawn(relay_system_status(state.clone()));
        tokio::task::yield_now().await;
        state.update_degraded(true);

        for rx in [&mut first, &mut second] {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.event.as_deref(), Some(EVENT_SYSTEM_STATUS));
            assert!(event.data.contains("\"degraded\":true"));
        }
        relay.abort();
    }
}
