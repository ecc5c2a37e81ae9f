use serde::Serialize;
use utoipa::ToSchema;

/// Coarse availability of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Storage reachable; sessions can be read and advanced.
    Ok,
    /// No usable storage; mutating endpoints answer 503.
    Degraded,
}

/// Payload of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Overall availability.
    pub status: HealthStatus,
    /// Sessions with at least one open event stream.
    pub streamed_sessions: usize,
}
