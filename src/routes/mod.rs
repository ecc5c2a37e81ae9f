use axum::Router;

use crate::state::SharedState;

/// Swagger UI and the OpenAPI document.
pub mod docs;
/// `/healthcheck`.
pub mod health;
/// Per-player submissions, scores and presence.
pub mod players;
/// Session creation, lookup and transitions.
pub mod sessions;
/// Per-session event streams.
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sessions::router())
        .merge(players::router())
        .merge(sse::router())
        .merge(docs::router());

    api_router.with_state(state)
}
