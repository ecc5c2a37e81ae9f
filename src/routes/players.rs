use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use axum_valid::Valid;

use crate::{
    dao::models::Phase,
    dto::{
        phase::{
            HeartbeatRequest, ScoreRequest, SubmitPhaseRequest, SubmitPhaseResponse, parse_phase,
        },
        validation::validate_id,
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Per-player endpoints: submissions, grading callbacks and presence.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/sessions/{id}/players/{user_id}/phases/{phase}",
            post(submit_phase),
        )
        .route(
            "/sessions/{id}/players/{user_id}/phases/{phase}/score",
            post(record_score),
        )
        .route(
            "/sessions/{id}/players/{user_id}/heartbeat",
            post(heartbeat),
        )
        .route(
            "/sessions/{id}/players/{user_id}/disconnect",
            post(disconnect),
        )
}

/// Submit a player's work for the running phase.
#[utoipa::path(
    post,
    path = "/sessions/{id}/players/{user_id}/phases/{phase}",
    tag = "players",
    params(
        ("id" = String, Path, description = "Session identifier"),
        ("user_id" = String, Path, description = "Player identifier"),
        ("phase" = u8, Path, description = "Phase number (1, 2 or 3)")
    ),
    request_body = SubmitPhaseRequest,
    responses(
        (status = 200, description = "Submission recorded", body = SubmitPhaseResponse),
        (status = 400, description = "Missing content or responses"),
        (status = 409, description = "Phase closed or already submitted")
    )
)]
pub async fn submit_phase(
    State(state): State<SharedState>,
    Path((id, user_id, phase)): Path<(String, String, u8)>,
    Valid(Json(payload)): Valid<Json<SubmitPhaseRequest>>,
) -> Result<Json<SubmitPhaseResponse>, AppError> {
    let phase = player_phase(&user_id, phase)?;
    let response = session_service::submit_phase(&state, &id, &user_id, phase, payload).await?;
    Ok(Json(response))
}

/// Record the grading score of a submitted phase.
#[utoipa::path(
    post,
    path = "/sessions/{id}/players/{user_id}/phases/{phase}/score",
    tag = "players",
    params(
        ("id" = String, Path, description = "Session identifier"),
        ("user_id" = String, Path, description = "Player identifier"),
        ("phase" = u8, Path, description = "Phase number (1, 2 or 3)")
    ),
    request_body = ScoreRequest,
    responses((status = 204, description = "Score recorded"))
)]
pub async fn record_score(
    State(state): State<SharedState>,
    Path((id, user_id, phase)): Path<(String, String, u8)>,
    Valid(Json(payload)): Valid<Json<ScoreRequest>>,
) -> Result<StatusCode, AppError> {
    let phase = player_phase(&user_id, phase)?;
    session_service::record_score(&state, &id, &user_id, phase, payload.score).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Refresh a player's heartbeat.
#[utoipa::path(
    post,
    path = "/sessions/{id}/players/{user_id}/heartbeat",
    tag = "players",
    params(
        ("id" = String, Path, description = "Session identifier"),
        ("user_id" = String, Path, description = "Player identifier")
    ),
    request_body = HeartbeatRequest,
    responses((status = 204, description = "Heartbeat recorded"))
)]
pub async fn heartbeat(
    State(state): State<SharedState>,
    Path((id, user_id)): Path<(String, String)>,
    Valid(Json(payload)): Valid<Json<HeartbeatRequest>>,
) -> Result<StatusCode, AppError> {
    check_user_id(&user_id)?;
    session_service::heartbeat(&state, &id, &user_id, payload.connection_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Mark a player as disconnected.
#[utoipa::path(
    post,
    path = "/sessions/{id}/players/{user_id}/disconnect",
    tag = "players",
    params(
        ("id" = String, Path, description = "Session identifier"),
        ("user_id" = String, Path, description = "Player identifier")
    ),
    responses((status = 204, description = "Player marked disconnected"))
)]
pub async fn disconnect(
    State(state): State<SharedState>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    check_user_id(&user_id)?;
    session_service::disconnect(&state, &id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn player_phase(user_id: &str, phase: u8) -> Result<Phase, AppError> {
    check_user_id(user_id)?;
    parse_phase(phase).map_err(AppError::BadRequest)
}

/// User ids end up in storage field paths, so they are checked before any lookup.
fn check_user_id(user_id: &str) -> Result<(), AppError> {
    validate_id(user_id).map_err(|err| {
        AppError::BadRequest(
            err.message
                .map(|message| message.into_owned())
                .unwrap_or_else(|| format!("invalid user id `{user_id}`")),
        )
    })
}
