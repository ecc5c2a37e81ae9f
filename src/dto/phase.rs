use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::{Phase, SessionStatus},
    services::phase_service::TransitionOutcome,
};

/// Longest accepted essay or feedback answer, in bytes.
pub const MAX_TEXT_LEN: usize = 50_000;

/// Body of the transition endpoints: the phase the caller believes is current.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct TransitionRequest {
    /// Phase number between 1 and 3.
    #[validate(range(min = 1, max = 3))]
    pub current_phase: u8,
}

/// Result of a transition attempt.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionResponse {
    /// Whether this call moved the session forward.
    pub applied: bool,
    /// Phase the session is in after the call.
    pub phase: u8,
    /// Lifecycle state after the call.
    pub state: SessionStatus,
    /// Why nothing happened, when `applied` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            applied: outcome.applied,
            phase: outcome.phase.number(),
            state: outcome.state,
            reason: outcome.skipped.map(|reason| reason.to_string()),
        }
    }
}

/// Result of the polling endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckTransitionResponse {
    /// Whether the session was ready and this call advanced it.
    pub transitioned: bool,
}

/// Phase payload submitted by a player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitPhaseRequest {
    /// Essay text, required for phases 1 and 3.
    #[serde(default)]
    #[validate(length(max = 50000))]
    pub content: Option<String>,
    /// Feedback answers keyed by question, required for phase 2.
    #[serde(default)]
    pub responses: Option<IndexMap<String, String>>,
}

/// Acknowledgement of a phase submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitPhaseResponse {
    /// Submitted phase number.
    pub phase: u8,
    /// Words counted in the submission.
    pub word_count: u32,
    /// Real players who have submitted this phase so far.
    pub ready_count: u32,
    /// Whether this submission completed the phase and advanced the session.
    pub transitioned: bool,
}

/// Score reported by the grading collaborator.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ScoreRequest {
    /// Grade between 0 and 100.
    #[validate(range(min = 0.0, max = 100.0))]
    pub score: f64,
}

/// Presence ping sent periodically by connected clients.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct HeartbeatRequest {
    /// Identifier of the client's SSE connection, if it has one.
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub connection_id: Option<String>,
}

/// Parse a phase number from a path segment or request body.
pub fn parse_phase(raw: u8) -> Result<Phase, String> {
    Phase::try_from(raw).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_request_range_is_enforced() {
        assert!(TransitionRequest { current_phase: 2 }.validate().is_ok());
        assert!(TransitionRequest { current_phase: 0 }.validate().is_err());
        assert!(TransitionRequest { current_phase: 4 }.validate().is_err());
    }

    #[test]
    fn score_range_is_enforced() {
        assert!(ScoreRequest { score: 87.5 }.validate().is_ok());
        assert!(ScoreRequest { score: -1.0 }.validate().is_err());
        assert!(ScoreRequest { score: 100.5 }.validate().is_err());
    }

    #[test]
    fn phase_numbers_outside_the_match_are_rejected() {
        assert_eq!(parse_phase(3), Ok(Phase::Revision));
        assert!(parse_phase(0).is_err());
    }
}
