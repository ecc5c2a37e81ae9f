//! Request and response payloads of the HTTP and SSE surface.

use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Healthcheck payloads.
pub mod health;
/// Phase submission and transition payloads.
pub mod phase;
/// Session creation and snapshot payloads.
pub mod session;
/// Server-sent event payloads.
pub mod sse;
pub mod validation;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
