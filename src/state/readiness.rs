//! Submission-readiness predicate deciding when a phase may end.

use crate::dao::models::{Phase, SessionEntity};

/// Whether every real (non-AI) player has submitted `phase`.
///
/// AI players never gate advancement. A session without real players is never
/// ready, so an all-AI lobby cannot advance on its own.
pub fn all_real_players_submitted(session: &SessionEntity, phase: Phase) -> bool {
    let mut real_players = session.real_players().peekable();
    if real_players.peek().is_none() {
        return false;
    }
    real_players.all(|player| player.phases.is_submitted(phase))
}

/// User ids of real players still missing a submission for `phase`.
pub fn missing_submissions(session: &SessionEntity, phase: Phase) -> Vec<String> {
    session
        .real_players()
        .filter(|player| !player.phases.is_submitted(phase))
        .map(|player| player.user_id.clone())
        .collect()
}

/// Number of real players who submitted `phase`.
pub fn ready_count(session: &SessionEntity, phase: Phase) -> u32 {
    session
        .real_players()
        .filter(|player| player.phases.is_submitted(phase))
        .count() as u32
}
