/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Phase transitions driven by the session state machine.
pub mod phase_service;
/// Session lifecycle, submissions and presence.
pub mod session_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events subscription service.
pub mod sse_service;
/// Storage backend selection and connection supervision.
pub mod storage_supervisor;
