//! Caching, session-oriented vulnerability feed server.
//!
//! Scanners obtain a session id for their platform and poll for batches of
//! vulnerability records. The server fetches each platform's feed once from
//! an upstream source, buckets it per platform, and serves all active
//! sessions from the shared bucket while tracking per-session progress.

pub mod api;
pub mod cache;
pub mod config;
pub mod server;
pub mod session_registry;
pub mod sources;
pub mod vulnerability;
