//! # LedgerLink Domain
//!
//! Business domain types and models for LedgerLink.
//!
//! This crate contains:
//! - Integrations, cursors and retry policies
//! - Expected and provider transactions, the provider ledger
//! - Provider webhook payload variants and their normalization
//! - Webhook deliveries, sync runs, health snapshots and alerts
//! - The override/audit log model
//! - Configuration structures and the error taxonomy
//!
//! ## Architecture
//! - No dependencies on other LedgerLink crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
