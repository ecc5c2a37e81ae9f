use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    dao::models::{CoordinationEntity, Phase, SessionEntity, SessionStatus},
    state::{
        durations::{PhaseDurationTable, aggregate_rank},
        readiness::{all_real_players_submitted, missing_submissions, ready_count},
    },
};

/// High-level stage a session is in, derived from its `state` and `config.phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    /// Lobby finalized; phase 1 has not started.
    Forming,
    /// One of the three timed phases is running.
    InPhase(Phase),
    /// All phases done.
    Completed,
    /// Stopped externally before completion.
    Abandoned,
}

impl MatchStage {
    /// Stage of the given session snapshot.
    pub fn of(session: &SessionEntity) -> Self {
        match session.state {
            SessionStatus::Forming => MatchStage::Forming,
            SessionStatus::Completed => MatchStage::Completed,
            SessionStatus::Abandoned => MatchStage::Abandoned,
            SessionStatus::Active | SessionStatus::Waiting | SessionStatus::Transitioning => {
                MatchStage::InPhase(session.config.phase)
            }
        }
    }

    /// Completed and abandoned stages accept no further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStage::Completed | MatchStage::Abandoned)
    }
}

/// Events that can be applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Begin phase 1.
    Start,
    /// Every real player submitted the given phase; move past it.
    AllSubmitted(Phase),
    /// External timeout/disconnect handler gave up on the session.
    Abandon,
}

/// Reasons a transition is not applied. None of these are failures: the
/// request is simply a no-op against the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The caller's phase is stale (already advanced) or ahead of the session.
    #[error("session is in phase {current}, not phase {requested}")]
    PhaseMismatch { requested: Phase, current: Phase },
    /// Some real players have not submitted yet.
    #[error("waiting for {} player(s) to submit phase {phase}", missing.len())]
    AwaitingSubmissions { phase: Phase, missing: Vec<String> },
    /// The session has no real players and can never become ready.
    #[error("session has no real players")]
    NoRealPlayers,
    /// Phase 1 has not started yet.
    #[error("session has not started")]
    NotStarted,
    /// The session is already past the forming stage.
    #[error("session already started")]
    AlreadyStarted,
    /// The session is completed or abandoned.
    #[error("session is {0:?}")]
    Terminal(MatchStage),
}

/// Error returned when a plan no longer matches the snapshot it is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stage changed since the transition was planned (expected {expected:?}, got {actual:?})")]
pub struct ApplyError {
    /// Stage when the plan was created.
    pub expected: MatchStage,
    /// Stage found when applying.
    pub actual: MatchStage,
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Unique identifier for this plan, used to correlate logs.
    pub id: PlanId,
    /// Stage the session is in.
    pub from: MatchStage,
    /// Stage the session will be in.
    pub to: MatchStage,
    /// Event that triggered this transition.
    pub event: SessionEvent,
    /// Duration in seconds of the phase being entered, if any.
    pub phase_duration: Option<u32>,
    /// Rank that drove the duration lookup, if one was known.
    pub aggregate_rank: Option<String>,
}

/// Validate that `event` can be applied to `session` and compute its effects.
pub fn plan(
    session: &SessionEntity,
    event: SessionEvent,
    durations: &PhaseDurationTable,
) -> Result<Plan, PlanError> {
    let from = MatchStage::of(session);
    let to = compute_transition(session, from, event)?;

    let (phase_duration, aggregate_rank) = match to {
        MatchStage::InPhase(phase) => {
            let rank = aggregate_rank(session.players.values());
            (Some(durations.duration_for(rank.as_deref(), phase)), rank)
        }
        _ => (None, None),
    };

    Ok(Plan {
        id: Uuid::new_v4(),
        from,
        to,
        event,
        phase_duration,
        aggregate_rank,
    })
}

/// Apply a planned transition to `session`, stamping `now` as the write time.
/// Returns the stage after the transition.
pub fn apply(
    session: &mut SessionEntity,
    plan: &Plan,
    now: SystemTime,
) -> Result<MatchStage, ApplyError> {
    let actual = MatchStage::of(session);
    if actual != plan.from {
        return Err(ApplyError {
            expected: plan.from,
            actual,
        });
    }

    match plan.to {
        MatchStage::InPhase(phase) => {
            session.config.phase = phase;
            if let Some(seconds) = plan.phase_duration {
                session.config.phase_duration = seconds;
            }
            session.timing.mark_started(phase, now);
            session.coordination = CoordinationEntity::default();
            session.state = SessionStatus::Active;
        }
        MatchStage::Completed => {
            session.state = SessionStatus::Completed;
            session.coordination.all_players_ready = true;
        }
        MatchStage::Abandoned => {
            session.state = SessionStatus::Abandoned;
        }
        MatchStage::Forming => {
            session.state = SessionStatus::Forming;
        }
    }

    session.updated_at = now;
    Ok(plan.to)
}

/// Refresh the shared coordination counters after a submission.
///
/// `ready_count` tracks real players who submitted the current phase and the
/// session switches between `active` and `waiting` depending on whether some,
/// but not all, of them are done. Returns `false` when nothing changed.
pub fn sync_coordination(session: &mut SessionEntity, now: SystemTime) -> bool {
    if !matches!(
        session.state,
        SessionStatus::Active | SessionStatus::Waiting
    ) {
        return false;
    }

    let phase = session.config.phase;
    let count = ready_count(session, phase);
    let all_ready = all_real_players_submitted(session, phase);
    let state = if count > 0 && !all_ready {
        SessionStatus::Waiting
    } else {
        SessionStatus::Active
    };

    let coordination = CoordinationEntity {
        ready_count: count,
        all_players_ready: all_ready,
    };
    if session.coordination == coordination && session.state == state {
        return false;
    }

    session.coordination = coordination;
    session.state = state;
    session.updated_at = now;
    true
}

/// Compute the next stage if the event can be applied.
fn compute_transition(
    session: &SessionEntity,
    from: MatchStage,
    event: SessionEvent,
) -> Result<MatchStage, PlanError> {
    if from.is_terminal() {
        return Err(PlanError::Terminal(from));
    }

    match (from, event) {
        (MatchStage::Forming, SessionEvent::Start) => Ok(MatchStage::InPhase(Phase::Writing)),
        (MatchStage::InPhase(_), SessionEvent::Start) => Err(PlanError::AlreadyStarted),
        (MatchStage::Forming, SessionEvent::AllSubmitted(_)) => Err(PlanError::NotStarted),
        (MatchStage::InPhase(current), SessionEvent::AllSubmitted(requested)) => {
            if current != requested {
                return Err(PlanError::PhaseMismatch { requested, current });
            }
            if session.real_players().next().is_none() {
                return Err(PlanError::NoRealPlayers);
            }
            if !all_real_players_submitted(session, current) {
                return Err(PlanError::AwaitingSubmissions {
                    phase: current,
                    missing: missing_submissions(session, current),
                });
            }
            Ok(current
                .next()
                .map_or(MatchStage::Completed, MatchStage::InPhase))
        }
        (_, SessionEvent::Abandon) => Ok(MatchStage::Abandoned),
        (MatchStage::Completed | MatchStage::Abandoned, _) => Err(PlanError::Terminal(from)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::fixtures::{player, session, submit};

    const T0: SystemTime = SystemTime::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        T0 + std::time::Duration::from_secs(secs)
    }

    fn two_player_session() -> SessionEntity {
        session(
            "s1",
            vec![
                player("alice", Some("Gold I"), false),
                player("bob", Some("Bronze II"), false),
                player("bot", Some("Platinum"), true),
            ],
        )
    }

    fn advance(session: &mut SessionEntity, event: SessionEvent, now: SystemTime) -> MatchStage {
        let plan = plan(session, event, &PhaseDurationTable::default()).unwrap();
        apply(session, &plan, now).unwrap()
    }

    #[test]
    fn start_moves_forming_session_into_phase_one() {
        let mut s = two_player_session();
        s.state = SessionStatus::Forming;

        let stage = advance(&mut s, SessionEvent::Start, at(1));
        assert_eq!(stage, MatchStage::InPhase(Phase::Writing));
        assert_eq!(s.state, SessionStatus::Active);
        assert_eq!(s.timing.phase1_start_time, Some(at(1)));
        // Ranks sorted: Bronze II, Gold I -> median "Gold I" -> 300s
        assert_eq!(s.config.phase_duration, 300);

        let err = plan(&s, SessionEvent::Start, &PhaseDurationTable::default()).unwrap_err();
        assert_eq!(err, PlanError::AlreadyStarted);
    }

    #[test]
    fn full_happy_path_through_match() {
        let mut s = two_player_session();

        submit(&mut s, "alice", Phase::Writing);
        submit(&mut s, "bob", Phase::Writing);
        assert_eq!(
            advance(&mut s, SessionEvent::AllSubmitted(Phase::Writing), at(10)),
            MatchStage::InPhase(Phase::PeerFeedback)
        );
        assert_eq!(s.config.phase, Phase::PeerFeedback);
        assert_eq!(s.config.phase_duration, 180);
        assert_eq!(s.coordination, CoordinationEntity::default());
        assert_eq!(s.timing.phase2_start_time, Some(at(10)));
        assert_eq!(s.state, SessionStatus::Active);
        assert_eq!(s.updated_at, at(10));

        submit(&mut s, "alice", Phase::PeerFeedback);
        submit(&mut s, "bob", Phase::PeerFeedback);
        assert_eq!(
            advance(&mut s, SessionEvent::AllSubmitted(Phase::PeerFeedback), at(20)),
            MatchStage::InPhase(Phase::Revision)
        );
        assert_eq!(s.config.phase_duration, 240);
        assert_eq!(s.timing.phase3_start_time, Some(at(20)));

        submit(&mut s, "alice", Phase::Revision);
        submit(&mut s, "bob", Phase::Revision);
        assert_eq!(
            advance(&mut s, SessionEvent::AllSubmitted(Phase::Revision), at(30)),
            MatchStage::Completed
        );
        assert_eq!(s.state, SessionStatus::Completed);
        assert_eq!(s.config.phase, Phase::Revision);
        assert!(s.coordination.all_players_ready);
    }

    #[test]
    fn phase_duration_falls_back_to_default_without_ranks() {
        let mut s = session(
            "s1",
            vec![player("alice", None, false), player("bot", Some("Bronze"), true)],
        );
        let table = PhaseDurationTable::default();

        submit(&mut s, "alice", Phase::Writing);
        let to_feedback = plan(&s, SessionEvent::AllSubmitted(Phase::Writing), &table).unwrap();
        assert_eq!(to_feedback.aggregate_rank, None);
        assert_eq!(to_feedback.phase_duration, Some(180));
        apply(&mut s, &to_feedback, at(5)).unwrap();

        submit(&mut s, "alice", Phase::PeerFeedback);
        let to_revision =
            plan(&s, SessionEvent::AllSubmitted(Phase::PeerFeedback), &table).unwrap();
        assert_eq!(to_revision.phase_duration, Some(240));
    }

    #[test]
    fn stale_phase_is_not_ready() {
        let mut s = two_player_session();
        submit(&mut s, "alice", Phase::Writing);
        submit(&mut s, "bob", Phase::Writing);
        advance(&mut s, SessionEvent::AllSubmitted(Phase::Writing), at(1));

        let err = plan(
            &s,
            SessionEvent::AllSubmitted(Phase::Writing),
            &PhaseDurationTable::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PlanError::PhaseMismatch {
                requested: Phase::Writing,
                current: Phase::PeerFeedback,
            }
        );
    }

    #[test]
    fn missing_real_submission_blocks_transition() {
        let mut s = two_player_session();
        submit(&mut s, "alice", Phase::Writing);
        submit(&mut s, "bot", Phase::Writing);

        let err = plan(
            &s,
            SessionEvent::AllSubmitted(Phase::Writing),
            &PhaseDurationTable::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PlanError::AwaitingSubmissions {
                phase: Phase::Writing,
                missing: vec!["bob".into()],
            }
        );
    }

    #[test]
    fn all_ai_session_never_advances() {
        let mut s = session("s1", vec![player("bot", None, true)]);
        submit(&mut s, "bot", Phase::Writing);
        let err = plan(
            &s,
            SessionEvent::AllSubmitted(Phase::Writing),
            &PhaseDurationTable::default(),
        )
        .unwrap_err();
        assert_eq!(err, PlanError::NoRealPlayers);
    }

    #[test]
    fn terminal_sessions_reject_every_event() {
        let mut s = two_player_session();
        advance(&mut s, SessionEvent::Abandon, at(1));
        assert_eq!(s.state, SessionStatus::Abandoned);

        for event in [
            SessionEvent::Start,
            SessionEvent::Abandon,
            SessionEvent::AllSubmitted(Phase::Writing),
        ] {
            let err = plan(&s, event, &PhaseDurationTable::default()).unwrap_err();
            assert_eq!(err, PlanError::Terminal(MatchStage::Abandoned));
        }
    }

    #[test]
    fn apply_rejects_plan_for_a_different_stage() {
        let mut s = two_player_session();
        submit(&mut s, "alice", Phase::Writing);
        submit(&mut s, "bob", Phase::Writing);
        let plan = plan(
            &s,
            SessionEvent::AllSubmitted(Phase::Writing),
            &PhaseDurationTable::default(),
        )
        .unwrap();

        apply(&mut s, &plan, at(1)).unwrap();
        let err = apply(&mut s, &plan, at(2)).unwrap_err();
        assert_eq!(err.expected, MatchStage::InPhase(Phase::Writing));
        assert_eq!(err.actual, MatchStage::InPhase(Phase::PeerFeedback));
        assert_eq!(s.timing.phase2_start_time, Some(at(1)));
    }

    #[test]
    fn coordination_tracks_partial_submissions() {
        let mut s = two_player_session();
        assert!(!sync_coordination(&mut s, at(1)));

        submit(&mut s, "alice", Phase::Writing);
        assert!(sync_coordination(&mut s, at(2)));
        assert_eq!(s.state, SessionStatus::Waiting);
        assert_eq!(s.coordination.ready_count, 1);
        assert!(!s.coordination.all_players_ready);

        submit(&mut s, "bob", Phase::Writing);
        assert!(sync_coordination(&mut s, at(3)));
        assert_eq!(s.state, SessionStatus::Active);
        assert_eq!(
            s.coordination,
            CoordinationEntity {
                ready_count: 2,
                all_players_ready: true,
            }
        );
        assert!(!sync_coordination(&mut s, at(4)));
    }

    #[test]
    fn phase_never_decreases_over_any_event_sequence() {
        let mut s = two_player_session();
        let events = [
            SessionEvent::AllSubmitted(Phase::PeerFeedback),
            SessionEvent::AllSubmitted(Phase::Writing),
            SessionEvent::Start,
            SessionEvent::AllSubmitted(Phase::Writing),
            SessionEvent::AllSubmitted(Phase::Revision),
            SessionEvent::AllSubmitted(Phase::PeerFeedback),
            SessionEvent::AllSubmitted(Phase::Revision),
            SessionEvent::AllSubmitted(Phase::Writing),
            SessionEvent::Abandon,
        ];

        let mut observed = vec![s.config.phase];
        for (step, event) in events.into_iter().enumerate() {
            for user in ["alice", "bob"] {
                let phase = s.config.phase;
                if !s.players[user].phases.is_submitted(phase) && !s.state.is_terminal() {
                    submit(&mut s, user, phase);
                }
            }
            if let Ok(plan) = plan(&s, event, &PhaseDurationTable::default()) {
                apply(&mut s, &plan, at(step as u64)).unwrap();
            }
            observed.push(s.config.phase);
        }

        assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(s.state, SessionStatus::Completed);
        assert_eq!(s.config.phase, Phase::Revision);
    }
}
