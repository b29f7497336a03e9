//! Shared harness for `ledgerlink-core` integration tests.
//!
//! Wires the engine, webhook tracker, health aggregator and override service
//! to one in-memory store, a scripted provider and a mock clock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledgerlink_common::MockClock;
use ledgerlink_core::breaker::breaker_config;
use ledgerlink_core::testing::{
    FakeProviderAdapter, InMemoryStore, RecordingMetrics, StaticAdapterFactory,
};
use ledgerlink_core::{
    AlertManager, BreakerRegistry, HealthAggregator, HealthPorts, OverrideService,
    ReconciliationEngine, ReconciliationPorts, SharedClock, WebhookTracker,
};
use ledgerlink_domain::{
    payload_hash, BreakerConfig, HealthConfig, Integration, NewTransactionRecord, Provider,
    ProviderTransaction, ReconciliationConfig, RetryPolicy, SyncMode, SyncPriority, SyncRequest,
    SyncRun, SyncTrigger, TransactionRecord,
};

/// 2024-03-01T09:00:00Z
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_709_283_600, 0).expect("valid timestamp")
}

pub fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

/// Retry policy with millisecond backoffs so fetch retries do not slow tests
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy { max_attempts: 3, initial_backoff_ms: 1, multiplier: 2.0, max_backoff_ms: 5 }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: MockClock,
    pub adapter: Arc<FakeProviderAdapter>,
    pub adapters: Arc<StaticAdapterFactory>,
    pub metrics: Arc<RecordingMetrics>,
    pub breakers: Arc<BreakerRegistry>,
    pub alerts: Arc<AlertManager>,
    pub engine: Arc<ReconciliationEngine>,
    pub integration: Integration,
}

impl Harness {
    /// Square integration for `biz-1` with default thresholds
    pub async fn new() -> Self {
        Self::with_config(ReconciliationConfig::default(), BreakerConfig::default()).await
    }

    pub async fn with_config(recon: ReconciliationConfig, breaker: BreakerConfig) -> Self {
        let clock = MockClock::at(t0());
        let shared: SharedClock = Arc::new(clock.clone());
        let store = Arc::new(InMemoryStore::new());
        let adapter = Arc::new(FakeProviderAdapter::new(Provider::Square));
        let adapters = Arc::new(StaticAdapterFactory::new());
        let metrics = Arc::new(RecordingMetrics::new());

        let mut integration = Integration::new("biz-1", Provider::Square, "env:SQUARE_TOKEN", t0());
        integration.retry_policy = fast_retry_policy();
        store.put_integration(integration.clone());
        adapters.register(integration.id, Arc::clone(&adapter));

        let breakers = Arc::new(BreakerRegistry::new(
            breaker_config(&breaker).expect("valid breaker config"),
            Arc::clone(&shared),
            store.clone(),
        ));
        let alerts = Arc::new(AlertManager::new(store.clone(), Arc::clone(&shared)));
        let ports = ReconciliationPorts {
            integrations: store.clone(),
            transactions: store.clone(),
            ledger: store.clone(),
            sync_runs: store.clone(),
            adapters: adapters.clone(),
            metrics: metrics.clone(),
        };
        let engine = Arc::new(ReconciliationEngine::new(
            ports,
            Arc::clone(&breakers),
            Arc::clone(&alerts),
            recon,
            shared,
        ));

        Self { store, clock, adapter, adapters, metrics, breakers, alerts, engine, integration }
    }

    pub fn shared_clock(&self) -> SharedClock {
        Arc::new(self.clock.clone())
    }

    pub fn integration_id(&self) -> uuid::Uuid {
        self.integration.id
    }

    pub fn webhook_tracker(&self) -> WebhookTracker {
        WebhookTracker::new(
            self.store.clone(),
            Arc::clone(&self.engine),
            Arc::clone(&self.alerts),
            self.shared_clock(),
        )
    }

    pub fn health(&self, config: HealthConfig) -> HealthAggregator {
        let ports = HealthPorts {
            integrations: self.store.clone(),
            transactions: self.store.clone(),
            webhooks: self.store.clone(),
            overrides: self.store.clone(),
            sync_runs: self.store.clone(),
            adapters: self.adapters.clone(),
            metrics: self.metrics.clone(),
        };
        HealthAggregator::new(
            ports,
            Arc::clone(&self.breakers),
            Arc::clone(&self.alerts),
            config,
            self.shared_clock(),
        )
    }

    pub fn overrides(&self) -> OverrideService {
        OverrideService::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.adapters.clone(),
            self.shared_clock(),
        )
    }

    /// Register an expected USD transaction created at `created_at`
    pub async fn expect_usd(&self, amount_minor: i64, created_at: DateTime<Utc>) -> TransactionRecord {
        self.engine
            .register_expected(NewTransactionRecord {
                id: None,
                integration_id: self.integration.id,
                amount_minor,
                currency: "USD".into(),
                created_at: Some(created_at),
            })
            .await
            .expect("register expected transaction")
    }

    /// Incremental sync at normal priority, as the scheduler issues it
    pub async fn sync(&self) -> SyncRun {
        self.engine.sync(SyncRequest::scheduled(self.integration.id)).await.expect("sync runs")
    }

    pub async fn sync_with(&self, mode: SyncMode, priority: SyncPriority) -> SyncRun {
        self.engine
            .sync(SyncRequest::new(self.integration.id, SyncTrigger::Manual, mode, priority))
            .await
            .expect("sync runs")
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by.to_std().unwrap_or(Duration::ZERO));
    }

    pub fn record(&self, id: uuid::Uuid) -> TransactionRecord {
        self.store.transaction(id).expect("record exists")
    }
}

/// A settled USD payment as a provider reports it
pub fn usd_payment(provider_txn_id: &str, amount_minor: i64, occurred_at: DateTime<Utc>) -> ProviderTransaction {
    ProviderTransaction {
        provider: Provider::Square,
        provider_txn_id: provider_txn_id.to_string(),
        business_id: "biz-1".into(),
        amount_minor,
        currency: "USD".into(),
        occurred_at,
        platform_reference: None,
        payload_hash: payload_hash(provider_txn_id.as_bytes()),
    }
}

/// Square `payment.updated` webhook body for one completed payment
pub fn square_webhook(event_id: &str, payment_id: &str, amount_minor: i64, at: DateTime<Utc>) -> Vec<u8> {
    serde_json::json!({
        "type": "payment.updated",
        "event_id": event_id,
        "created_at": at,
        "data": {
            "type": "payment",
            "id": payment_id,
            "object": {
                "payment": {
                    "id": payment_id,
                    "status": "COMPLETED",
                    "amount_money": { "amount": amount_minor, "currency": "USD" },
                    "created_at": at,
                }
            }
        }
    })
    .to_string()
    .into_bytes()
}
