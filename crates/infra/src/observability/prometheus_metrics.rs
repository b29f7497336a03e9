use std::time::Duration;

use ledgerlink_core::ReconMetricsPort;
use ledgerlink_domain::{BreakerState, Provider, SyncOutcome, WebhookOutcome};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use uuid::Uuid;

use super::MetricsResult;

const PROVIDER_CALL_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Prometheus exporter for reconciliation metrics
pub struct PrometheusMetrics {
    registry: Registry,
    webhooks: CounterVec,
    sync_runs: CounterVec,
    classifications: CounterVec,
    provider_calls: HistogramVec,
    /// 0=closed, 1=open, 2=half-open
    breaker_state: GaugeVec,
    records: GaugeVec,
}

impl PrometheusMetrics {
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new_custom(Some("ledgerlink".to_string()), None)?;

        let webhooks = CounterVec::new(
            Opts::new("webhook_events_total", "Webhook deliveries by final outcome"),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(webhooks.clone()))?;

        let sync_runs = CounterVec::new(
            Opts::new("sync_runs_total", "Sync operations by outcome"),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(sync_runs.clone()))?;

        let classifications = CounterVec::new(
            Opts::new("classifications_total", "Transactions and records by reconciliation outcome"),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(classifications.clone()))?;

        let provider_calls = HistogramVec::new(
            HistogramOpts::new("provider_call_seconds", "Latency of provider API calls")
                .buckets(PROVIDER_CALL_BUCKETS.to_vec()),
            &["provider", "result"],
        )?;
        registry.register(Box::new(provider_calls.clone()))?;

        let breaker_state = GaugeVec::new(
            Opts::new("breaker_state", "Circuit breaker state (0=closed, 1=open, 2=half-open)"),
            &["integration_id"],
        )?;
        registry.register(Box::new(breaker_state.clone()))?;

        let records = GaugeVec::new(
            Opts::new("transaction_records", "Expected records that are not yet matched"),
            &["integration_id", "state"],
        )?;
        registry.register(Box::new(records.clone()))?;

        Ok(Self {
            registry,
            webhooks,
            sync_runs,
            classifications,
            provider_calls,
            breaker_state,
            records,
        })
    }

    /// Text exposition of every collector
    pub fn render(&self) -> MetricsResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub const fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[allow(clippy::cast_precision_loss)]
impl ReconMetricsPort for PrometheusMetrics {
    fn record_webhook(&self, provider: Provider, outcome: WebhookOutcome) {
        self.webhooks.with_label_values(&[&provider.to_string(), &outcome.to_string()]).inc();
    }

    fn record_sync_run(&self, provider: Provider, outcome: SyncOutcome) {
        self.sync_runs.with_label_values(&[&provider.to_string(), &outcome.to_string()]).inc();
    }

    fn record_classification(&self, provider: Provider, outcome: &str) {
        self.classifications.with_label_values(&[&provider.to_string(), outcome]).inc();
    }

    fn observe_provider_call(&self, provider: Provider, elapsed: Duration, success: bool) {
        let result = if success { "ok" } else { "error" };
        self.provider_calls
            .with_label_values(&[&provider.to_string(), result])
            .observe(elapsed.as_secs_f64());
    }

    fn set_breaker_state(&self, integration_id: Uuid, state: BreakerState) {
        let value = match state {
            BreakerState::Closed => 0.0,
            BreakerState::Open => 1.0,
            BreakerState::HalfOpen => 2.0,
        };
        self.breaker_state.with_label_values(&[&integration_id.to_string()]).set(value);
    }

    fn set_record_gauges(&self, integration_id: Uuid, pending: u64, failed: u64) {
        let id = integration_id.to_string();
        self.records.with_label_values(&[&id, "pending"]).set(pending as f64);
        self.records.with_label_values(&[&id, "failed"]).set(failed as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_series() {
        let metrics = PrometheusMetrics::new().expect("metrics");
        let integration = Uuid::now_v7();

        metrics.record_webhook(Provider::Square, WebhookOutcome::Accepted);
        metrics.record_webhook(Provider::Square, WebhookOutcome::Accepted);
        metrics.record_sync_run(Provider::Zettle, SyncOutcome::BreakerOpen);
        metrics.record_classification(Provider::Shopify, "amount_mismatch");
        metrics.observe_provider_call(Provider::Square, Duration::from_millis(120), true);
        metrics.set_breaker_state(integration, BreakerState::HalfOpen);
        metrics.set_record_gauges(integration, 4, 1);

        let text = metrics.render().expect("rendered");
        assert!(text.contains(r#"ledgerlink_webhook_events_total{outcome="accepted",provider="square"} 2"#));
        assert!(text.contains(r#"ledgerlink_sync_runs_total{outcome="breaker_open",provider="zettle"} 1"#));
        assert!(text.contains("ledgerlink_classifications_total"));
        assert!(text.contains("ledgerlink_provider_call_seconds_bucket"));
        assert!(text.contains(&format!(r#"ledgerlink_breaker_state{{integration_id="{integration}"}} 2"#)));
        assert!(text.contains(r#"state="pending"} 4"#));
    }

    #[test]
    fn instances_do_not_share_a_registry() {
        let first = PrometheusMetrics::new().expect("first");
        let second = PrometheusMetrics::new().expect("second");
        first.record_sync_run(Provider::Square, SyncOutcome::Completed);
        assert!(!second.render().expect("rendered").contains("sync_runs_total{"));
    }
}
