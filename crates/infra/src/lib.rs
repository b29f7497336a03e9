//! # LedgerLink Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - SQLite repositories behind an r2d2 pool
//! - Square, Shopify and Zettle provider adapters (reqwest)
//! - Credential resolution and the per-integration adapter cache
//! - The Prometheus metrics exporter
//! - The sync scheduler and the configuration loader
//!
//! ## Architecture
//! - Implements traits defined in `ledgerlink-core`
//! - Depends on `ledgerlink-domain`, `ledgerlink-common` and `ledgerlink-core`
//! - Contains all "impure" code (I/O, network, clocks of the real world)

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod observability;
pub mod providers;
pub mod scheduling;

// Re-export commonly used items
pub use database::*;
pub use errors::InfraError;
pub use http::*;
pub use observability::{MetricsError, PrometheusMetrics};
pub use providers::*;
pub use scheduling::{SchedulerError, SchedulerResult, SyncScheduler, SyncSchedulerConfig};
