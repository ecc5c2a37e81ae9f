use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        phase::{CheckTransitionResponse, TransitionRequest, TransitionResponse, parse_phase},
        session::{CreateSessionRequest, SessionListItem, SessionView},
    },
    error::AppError,
    services::{phase_service, session_service},
    state::SharedState,
};

/// Session lifecycle and phase transition endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/start", post(start_session))
        .route("/sessions/{id}/abandon", post(abandon_session))
        .route("/sessions/{id}/transition", post(transition))
        .route("/sessions/{id}/check-transition", post(check_transition))
}

/// Create a session for a finalized lobby.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created in the forming state", body = SessionView),
        (status = 400, description = "Invalid lobby definition"),
        (status = 409, description = "Session id already taken")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let session = session_service::create_session(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// List stored sessions.
#[utoipa::path(
    get,
    path = "/sessions",
    tag = "sessions",
    responses((status = 200, description = "Stored sessions", body = [SessionListItem]))
)]
pub async fn list_sessions(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SessionListItem>>, AppError> {
    Ok(Json(session_service::list_sessions(&state).await?))
}

/// Retrieve a session snapshot.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session", body = SessionView),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::get_session(&state, &id).await?))
}

/// Delete a session.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses((status = 204, description = "Session deleted"))
)]
pub async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    session_service::delete_session(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start phase 1.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses((status = 200, description = "Start result", body = TransitionResponse))
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = phase_service::start_session(&state, &id).await?;
    Ok(Json(outcome.into()))
}

/// Abandon a session (timeout or disconnect handler).
#[utoipa::path(
    post,
    path = "/sessions/{id}/abandon",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses((status = 200, description = "Abandon result", body = TransitionResponse))
)]
pub async fn abandon_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = phase_service::abandon_session(&state, &id).await?;
    Ok(Json(outcome.into()))
}

/// Advance the session past `current_phase` if every real player submitted it.
#[utoipa::path(
    post,
    path = "/sessions/{id}/transition",
    tag = "phases",
    params(("id" = String, Path, description = "Session identifier")),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Transition result; `applied` is false when preconditions failed", body = TransitionResponse),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn transition(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<TransitionRequest>>,
) -> Result<Json<TransitionResponse>, AppError> {
    let phase = parse_phase(payload.current_phase).map_err(AppError::BadRequest)?;
    let outcome = phase_service::transition(&state, &id, phase).await?;
    Ok(Json(outcome.into()))
}

/// Polling variant of the transition: cheap readiness check first.
#[utoipa::path(
    post,
    path = "/sessions/{id}/check-transition",
    tag = "phases",
    params(("id" = String, Path, description = "Session identifier")),
    request_body = TransitionRequest,
    responses((status = 200, description = "Whether the session advanced", body = CheckTransitionResponse))
)]
pub async fn check_transition(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Valid(Json(payload)): Valid<Json<TransitionRequest>>,
) -> Result<Json<CheckTransitionResponse>, AppError> {
    let phase = parse_phase(payload.current_phase).map_err(AppError::BadRequest)?;
    let transitioned = phase_service::check_and_transition(&state, &id, phase).await?;
    Ok(Json(CheckTransitionResponse { transitioned }))
}
