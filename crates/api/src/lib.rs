//! # LedgerLink API
//!
//! Application layer - HTTP surface, commands and the entry point.
//!
//! This crate contains:
//! - Commands (HTTP handlers → core services)
//! - Application context (dependency injection)
//! - Logging bootstrap and the `ledgerlink` binary
//!
//! ## Architecture
//! - Depends on `common`, `domain`, `core`, and `infra`
//! - Wires up the hexagonal architecture
//! - Serves webhooks, health queries and operator commands over axum

pub mod commands;
pub mod context;
pub mod http;
pub mod utils;

// Re-export for convenience
pub use context::AppContext;
pub use http::{router, ApiError, ApiResult};
