//! Metrics port - reconciliation and health counters
//!
//! Implemented by the Prometheus exporter in infra. Methods are synchronous
//! and must not block; they are called from hot paths.

use std::time::Duration;

use ledgerlink_domain::{BreakerState, Provider, SyncOutcome, WebhookOutcome};
use uuid::Uuid;

/// Port trait for exporting engine metrics
pub trait ReconMetricsPort: Send + Sync {
    /// One webhook delivery finished with `outcome`
    fn record_webhook(&self, provider: Provider, outcome: WebhookOutcome);

    /// One sync operation finished with `outcome`
    fn record_sync_run(&self, provider: Provider, outcome: SyncOutcome);

    /// A provider transaction or expected record was classified
    ///
    /// `outcome` is one of `matched`, `ambiguous`, `amount_mismatch`,
    /// `unexpected`, `duplicate`, `stale_retry`, `stale_failed`.
    fn record_classification(&self, provider: Provider, outcome: &str);

    /// Latency of one provider API call
    fn observe_provider_call(&self, provider: Provider, elapsed: Duration, success: bool);

    fn set_breaker_state(&self, integration_id: Uuid, state: BreakerState);

    fn set_record_gauges(&self, integration_id: Uuid, pending: u64, failed: u64);
}

/// Metrics sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl ReconMetricsPort for NoopMetrics {
    fn record_webhook(&self, _provider: Provider, _outcome: WebhookOutcome) {}

    fn record_sync_run(&self, _provider: Provider, _outcome: SyncOutcome) {}

    fn record_classification(&self, _provider: Provider, _outcome: &str) {}

    fn observe_provider_call(&self, _provider: Provider, _elapsed: Duration, _success: bool) {}

    fn set_breaker_state(&self, _integration_id: Uuid, _state: BreakerState) {}

    fn set_record_gauges(&self, _integration_id: Uuid, _pending: u64, _failed: u64) {}
}
