//! Phase transitions of a session. Every transition runs plan + apply inside a
//! storage transaction so concurrent callers cannot both advance the same
//! phase, and only the winner broadcasts the change.

use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{Phase, SessionEntity, SessionStatus},
        session_store::transaction::{TxOutcome, run_transaction},
    },
    error::ServiceError,
    services::sse_events,
    state::{
        ApplyError, Plan, PlanError, SessionEvent, SharedState, readiness, state_machine,
    },
};

/// Result of asking the state machine to move a session forward.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    /// Whether this call committed the transition.
    pub applied: bool,
    /// Phase after the call.
    pub phase: Phase,
    /// Lifecycle state after the call.
    pub state: SessionStatus,
    /// Precondition that failed when nothing was applied.
    pub skipped: Option<PlanError>,
}

impl TransitionOutcome {
    fn applied(session: &SessionEntity) -> Self {
        Self {
            applied: true,
            phase: session.config.phase,
            state: session.state,
            skipped: None,
        }
    }

    fn skipped(session: &SessionEntity, reason: PlanError) -> Self {
        Self {
            applied: false,
            phase: session.config.phase,
            state: session.state,
            skipped: Some(reason),
        }
    }
}

/// Why the transaction closure declined to write.
enum Rejection {
    Plan(PlanError),
    Apply(ApplyError),
}

impl From<PlanError> for Rejection {
    fn from(err: PlanError) -> Self {
        Rejection::Plan(err)
    }
}

impl From<ApplyError> for Rejection {
    fn from(err: ApplyError) -> Self {
        Rejection::Apply(err)
    }
}

/// Advance `session_id` past `current_phase` once every real player submitted it.
///
/// Returns `applied = false` when the session already moved on or is still
/// waiting for submissions. A missing session is an error.
pub async fn transition(
    state: &SharedState,
    session_id: &str,
    current_phase: Phase,
) -> Result<TransitionOutcome, ServiceError> {
    run_event(state, session_id, SessionEvent::AllSubmitted(current_phase)).await
}

/// Polling entry point: cheap read first, transactional transition only when it looks ready.
///
/// Failing to read the session is logged and reported as `false`; errors of the
/// transaction itself propagate.
pub async fn check_and_transition(
    state: &SharedState,
    session_id: &str,
    current_phase: Phase,
) -> Result<bool, ServiceError> {
    let store = match state.require_session_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(session_id, error = %err, "cannot check transition without storage");
            return Ok(false);
        }
    };

    let snapshot = match store.find_session(session_id.to_owned()).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            warn!(session_id, "cannot check transition of unknown session");
            return Ok(false);
        }
        Err(err) => {
            warn!(session_id, error = %err, "failed to read session while checking transition");
            return Ok(false);
        }
    };

    if snapshot.state.is_terminal()
        || snapshot.config.phase != current_phase
        || !readiness::all_real_players_submitted(&snapshot, current_phase)
    {
        return Ok(false);
    }

    let outcome = transition(state, session_id, current_phase).await?;
    Ok(outcome.applied)
}

/// Start phase 1 of a forming session.
pub async fn start_session(
    state: &SharedState,
    session_id: &str,
) -> Result<TransitionOutcome, ServiceError> {
    run_event(state, session_id, SessionEvent::Start).await
}

/// Stop a session for good. No-op when it already ended.
pub async fn abandon_session(
    state: &SharedState,
    session_id: &str,
) -> Result<TransitionOutcome, ServiceError> {
    run_event(state, session_id, SessionEvent::Abandon).await
}

async fn run_event(
    state: &SharedState,
    session_id: &str,
    event: SessionEvent,
) -> Result<TransitionOutcome, ServiceError> {
    let store = state.require_session_store().await?;
    let durations = state.config().durations();

    let outcome = run_transaction(store.as_ref(), session_id, |session, now| {
        let plan = state_machine::plan(session, event, durations)?;
        state_machine::apply(session, &plan, now)?;
        Ok::<Plan, Rejection>(plan)
    })
    .await?;

    match outcome {
        TxOutcome::Committed {
            value: plan,
            session,
        } => {
            info!(
                session_id,
                plan_id = %plan.id,
                event = ?plan.event,
                from = ?plan.from,
                to = ?plan.to,
                phase_duration = ?plan.phase_duration,
                aggregate_rank = ?plan.aggregate_rank,
                "session transition applied"
            );
            sse_events::broadcast_phase_changed(state, &session, plan.from);
            sse_events::broadcast_session_updated(state, &session);
            Ok(TransitionOutcome::applied(&session))
        }
        TxOutcome::Skipped {
            reason: Rejection::Plan(reason),
            session,
        } => {
            debug!(session_id, ?event, reason = %reason, "session transition skipped");
            Ok(TransitionOutcome::skipped(&session, reason))
        }
        TxOutcome::Skipped {
            reason: Rejection::Apply(err),
            ..
        } => Err(err.into()),
    }
}
