/// Session document model and per-player patches.
pub mod models;
/// Exponential backoff shared by backends and transactions.
pub mod retry;
/// Session persistence abstraction and its backends.
pub mod session_store;
/// Backend-independent storage errors.
pub mod storage;
