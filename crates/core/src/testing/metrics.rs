//! Metrics sink that remembers what it was told

use std::collections::HashMap;
use std::time::Duration;

use ledgerlink_domain::{BreakerState, Provider, SyncOutcome, WebhookOutcome};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::metrics_ports::ReconMetricsPort;

#[derive(Default)]
struct Recorded {
    webhooks: Vec<(Provider, WebhookOutcome)>,
    sync_runs: Vec<(Provider, SyncOutcome)>,
    classifications: Vec<(Provider, String)>,
    provider_calls: Vec<(Provider, bool)>,
    breaker_states: HashMap<Uuid, BreakerState>,
    record_gauges: HashMap<Uuid, (u64, u64)>,
}

#[derive(Default)]
pub struct RecordingMetrics {
    recorded: Mutex<Recorded>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync_outcomes(&self) -> Vec<SyncOutcome> {
        self.recorded.lock().sync_runs.iter().map(|(_, outcome)| *outcome).collect()
    }

    pub fn webhook_outcomes(&self) -> Vec<WebhookOutcome> {
        self.recorded.lock().webhooks.iter().map(|(_, outcome)| *outcome).collect()
    }

    /// How often `outcome` was recorded as a classification
    pub fn classification_count(&self, outcome: &str) -> usize {
        self.recorded.lock().classifications.iter().filter(|(_, o)| o == outcome).count()
    }

    pub fn provider_calls(&self) -> usize {
        self.recorded.lock().provider_calls.len()
    }

    pub fn breaker_state(&self, integration_id: Uuid) -> Option<BreakerState> {
        self.recorded.lock().breaker_states.get(&integration_id).copied()
    }

    /// Last `(pending, failed)` gauge values
    pub fn record_gauges(&self, integration_id: Uuid) -> Option<(u64, u64)> {
        self.recorded.lock().record_gauges.get(&integration_id).copied()
    }
}

impl ReconMetricsPort for RecordingMetrics {
    fn record_webhook(&self, provider: Provider, outcome: WebhookOutcome) {
        self.recorded.lock().webhooks.push((provider, outcome));
    }

    fn record_sync_run(&self, provider: Provider, outcome: SyncOutcome) {
        self.recorded.lock().sync_runs.push((provider, outcome));
    }

    fn record_classification(&self, provider: Provider, outcome: &str) {
        self.recorded.lock().classifications.push((provider, outcome.to_string()));
    }

    fn observe_provider_call(&self, provider: Provider, _elapsed: Duration, success: bool) {
        self.recorded.lock().provider_calls.push((provider, success));
    }

    fn set_breaker_state(&self, integration_id: Uuid, state: BreakerState) {
        self.recorded.lock().breaker_states.insert(integration_id, state);
    }

    fn set_record_gauges(&self, integration_id: Uuid, pending: u64, failed: u64) {
        self.recorded.lock().record_gauges.insert(integration_id, (pending, failed));
    }
}
