use serde::Serialize;
use utoipa::ToSchema;

use crate::dao::models::SessionStatus;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE `event:` name; `None` sends an unnamed message.
    pub event: Option<String>,
    /// Encoded JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already encoded payload.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self::new(event.into(), serde_json::to_string(payload)?))
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Session the stream is bound to.
    pub session_id: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    /// Whether the storage backend is currently unreachable.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast whenever a session moves to another phase or a terminal state.
pub struct PhaseChangedEvent {
    /// Session that changed.
    pub session_id: String,
    /// Phase before the transition, absent when the session was still forming.
    pub previous_phase: Option<u8>,
    /// Phase after the transition.
    pub phase: u8,
    /// Lifecycle state after the transition.
    pub state: SessionStatus,
    /// Duration of the new phase in seconds.
    pub phase_duration: u32,
    /// Server time at which the new phase started.
    pub phase_start_time: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player submits a phase.
pub struct PlayerSubmittedEvent {
    /// Session the submission belongs to.
    pub session_id: String,
    /// Player who submitted.
    pub user_id: String,
    /// Submitted phase number.
    pub phase: u8,
    /// Words in the submission; the content itself is not broadcast.
    pub word_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_events_carry_name_and_encoded_payload() {
        let event = ServerEvent::json(
            "system.status".to_owned(),
            &SystemStatus { degraded: true },
        )
        .unwrap();
        assert_eq!(event.event.as_deref(), Some("system.status"));
        assert_eq!(event.data, r#"{"degraded":true}"#);

        let unnamed = ServerEvent::json(None::<String>, &SystemStatus { degraded: false }).unwrap();
        assert!(unnamed.event.is_none());
    }
}
