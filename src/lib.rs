//! Library crate for writing-arena-back: session phase state machine, storage
//! backends and the HTTP/SSE surface, exposed for binaries and integration tests.

pub mod config;
/// Persistence: session model, storage backends and transactions.
pub mod dao;
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// Axum routers and handlers.
pub mod routes;
/// Business logic behind the routes.
pub mod services;
/// Shared application state and the phase state machine.
pub mod state;
