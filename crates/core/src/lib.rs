//! # LedgerLink Core
//!
//! Reconciliation and integration-health logic - no infrastructure
//! dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for persistence, providers and metrics
//! - The reconciliation engine and its matcher
//! - Webhook delivery tracking, health aggregation and the override service
//!
//! ## Architecture Principles
//! - Only depends on `ledgerlink-common` and `ledgerlink-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits
//! - Time is read through an injected [`SharedClock`]

use std::sync::Arc;

pub mod breaker;
pub mod health;
pub mod overrides;
pub mod providers;
pub mod reconciliation;
pub mod webhooks;

// Infrastructure ports
pub mod metrics_ports;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

/// Clock shared by every service
pub type SharedClock = Arc<dyn ledgerlink_common::Clock>;

pub use breaker::{BreakerRegistry, BreakerStateRepository, IntegrationBreaker};
pub use health::ports::{AlertFilter, AlertRepository};
pub use health::{AlertManager, HealthAggregator, HealthPorts, HealthThresholds};
pub use metrics_ports::{NoopMetrics, ReconMetricsPort};
pub use overrides::ports::OverrideLogRepository;
pub use overrides::{OverrideService, OverrideTransaction, ReconfigureIntegration};
pub use providers::{AdapterFactory, ProviderAdapter};
pub use reconciliation::ports::{
    IntegrationRepository, LedgerRepository, SyncRunRepository, TransactionFilter,
    TransactionRepository,
};
pub use reconciliation::{ReconciliationEngine, ReconciliationPorts};
pub use webhooks::ports::WebhookEventRepository;
pub use webhooks::WebhookTracker;
