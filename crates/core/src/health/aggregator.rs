//! Per-integration health rollup

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledgerlink_domain::{
    HealthConfig, HealthInputs, HealthSnapshot, Integration, LedgerLinkError, Result,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::alerts::AlertManager;
use super::classifier::{active_alert_conditions, classify, HealthThresholds};
use crate::breaker::BreakerRegistry;
use crate::metrics_ports::ReconMetricsPort;
use crate::overrides::ports::OverrideLogRepository;
use crate::providers::AdapterFactory;
use crate::reconciliation::ports::{
    IntegrationRepository, SyncRunRepository, TransactionRepository,
};
use crate::webhooks::ports::WebhookEventRepository;
use crate::SharedClock;

/// Read-side collaborators of the aggregator
#[derive(Clone)]
pub struct HealthPorts {
    pub integrations: Arc<dyn IntegrationRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub webhooks: Arc<dyn WebhookEventRepository>,
    pub overrides: Arc<dyn OverrideLogRepository>,
    pub sync_runs: Arc<dyn SyncRunRepository>,
    pub adapters: Arc<dyn AdapterFactory>,
    pub metrics: Arc<dyn ReconMetricsPort>,
}

/// Rolls breaker state, record outcomes and webhook stats into a health
/// classification
///
/// `snapshot*` only reads; `evaluate*` also opens and resolves alerts and
/// refreshes gauges.
pub struct HealthAggregator {
    ports: HealthPorts,
    breakers: Arc<BreakerRegistry>,
    alerts: Arc<AlertManager>,
    config: HealthConfig,
    thresholds: HealthThresholds,
    clock: SharedClock,
}

impl HealthAggregator {
    pub fn new(
        ports: HealthPorts,
        breakers: Arc<BreakerRegistry>,
        alerts: Arc<AlertManager>,
        config: HealthConfig,
        clock: SharedClock,
    ) -> Self {
        let thresholds = HealthThresholds::from(&config);
        Self { ports, breakers, alerts, config, thresholds, clock }
    }

    pub const fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Current health of one integration
    pub async fn snapshot(&self, integration_id: Uuid) -> Result<HealthSnapshot> {
        let integration = self.load_integration(integration_id).await?;
        let (snapshot, _) = self.build(&integration, self.clock.now()).await?;
        Ok(snapshot)
    }

    /// Current health of every integration
    pub async fn snapshot_all(&self) -> Result<Vec<HealthSnapshot>> {
        let now = self.clock.now();
        let mut snapshots = Vec::new();
        for integration in self.ports.integrations.list().await? {
            snapshots.push(self.build(&integration, now).await?.0);
        }
        Ok(snapshots)
    }

    /// Recompute health and reconcile alerts for one integration
    #[instrument(skip(self))]
    pub async fn evaluate(&self, integration_id: Uuid) -> Result<HealthSnapshot> {
        let integration = self.load_integration(integration_id).await?;
        self.evaluate_integration(&integration, self.clock.now()).await
    }

    /// Evaluate every integration; one failing integration does not stop the
    /// others
    pub async fn evaluate_all(&self) -> Result<Vec<HealthSnapshot>> {
        let now = self.clock.now();
        let mut snapshots = Vec::new();
        for integration in self.ports.integrations.list().await? {
            match self.evaluate_integration(&integration, now).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => {
                    warn!(integration_id = %integration.id, error = %err, "health evaluation failed");
                }
            }
        }
        Ok(snapshots)
    }

    async fn evaluate_integration(
        &self,
        integration: &Integration,
        now: DateTime<Utc>,
    ) -> Result<HealthSnapshot> {
        let (mut snapshot, inputs) = self.build(integration, now).await?;

        let active = active_alert_conditions(&inputs, &self.thresholds);
        let changes = self.alerts.reconcile(integration.id, &active).await?;
        if !changes.opened.is_empty() || !changes.resolved.is_empty() {
            info!(
                integration_id = %integration.id,
                opened = ?changes.opened,
                resolved = ?changes.resolved,
                status = %snapshot.status,
                "alerts reconciled"
            );
            snapshot.open_alerts = self.alerts.open_for(integration.id).await?;
        }

        self.ports.metrics.set_breaker_state(integration.id, snapshot.breaker_state);
        self.ports.metrics.set_record_gauges(
            integration.id,
            snapshot.pending_count,
            snapshot.failed_count,
        );
        debug!(integration_id = %integration.id, status = %snapshot.status, "health evaluated");
        Ok(snapshot)
    }

    async fn build(
        &self,
        integration: &Integration,
        now: DateTime<Utc>,
    ) -> Result<(HealthSnapshot, HealthInputs)> {
        let id = integration.id;
        let since = now - self.config.lookback();

        let recent = self.ports.transactions.state_counts(id, Some(since)).await?;
        let overall = self.ports.transactions.state_counts(id, None).await?;
        let webhooks = self.ports.webhooks.stats(id, since, now).await?;
        let breaker = self.breakers.state(id).await?;

        let inputs = HealthInputs {
            enabled: integration.enabled,
            status: integration.status,
            breaker,
            records: recent,
            webhooks,
            rate_limit_headroom: self.ports.adapters.cached_headroom(id),
            unresolved_failures: overall.failed,
        };
        let (status, reasons) = classify(&inputs, &self.thresholds);

        let snapshot = HealthSnapshot {
            integration_id: id,
            business_id: integration.business_id.clone(),
            provider: integration.provider,
            status,
            reasons,
            breaker_state: breaker,
            integration_status: integration.status,
            enabled: integration.enabled,
            last_successful_sync_at: integration.last_synced_at,
            last_sync_run: self.ports.sync_runs.latest(id).await?,
            pending_count: overall.pending,
            failed_count: overall.failed,
            sync_failure_rate: recent.failure_rate(),
            webhooks,
            rate_limit_headroom: inputs.rate_limit_headroom,
            open_alerts: self.alerts.open_for(id).await?,
            overrides_in_lookback: self.ports.overrides.count_since(id, since).await?,
            evaluated_at: now,
        };
        Ok((snapshot, inputs))
    }

    async fn load_integration(&self, id: Uuid) -> Result<Integration> {
        self.ports
            .integrations
            .get(id)
            .await?
            .ok_or_else(|| LedgerLinkError::not_found(format!("integration {id}")))
    }
}
