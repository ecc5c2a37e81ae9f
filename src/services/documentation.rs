use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Writing Arena Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::create_session,
        crate::routes::sessions::list_sessions,
        crate::routes::sessions::get_session,
        crate::routes::sessions::delete_session,
        crate::routes::sessions::start_session,
        crate::routes::sessions::abandon_session,
        crate::routes::sessions::transition,
        crate::routes::sessions::check_transition,
        crate::routes::players::submit_phase,
        crate::routes::players::record_score,
        crate::routes::players::heartbeat,
        crate::routes::players::disconnect,
        crate::routes::sse::session_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::PlayerInput,
            crate::dto::session::SessionView,
            crate::dto::session::SessionListItem,
            crate::dto::phase::TransitionRequest,
            crate::dto::phase::TransitionResponse,
            crate::dto::phase::CheckTransitionResponse,
            crate::dto::phase::SubmitPhaseRequest,
            crate::dto::phase::SubmitPhaseResponse,
            crate::dto::phase::ScoreRequest,
            crate::dto::phase::HeartbeatRequest,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::PhaseChangedEvent,
            crate::dto::sse::PlayerSubmittedEvent,
            crate::dao::models::SessionMode,
            crate::dao::models::SessionStatus,
            crate::dao::models::ConnectionStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session lifecycle"),
        (name = "phases", description = "Phase transitions"),
        (name = "players", description = "Player submissions, scores and presence"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
/// OpenAPI document of every route.
pub struct ApiDoc;
