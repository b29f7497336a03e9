//! In-memory implementation of every repository port
//!
//! One mutex guards all tables so multi-row invariants (CAS, claim keys,
//! single open alert) hold the same way the SQLite store enforces them.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_common::BreakerSnapshot;
use ledgerlink_domain::{
    Alert, AlertKind, Integration, IntegrationStatus, LedgerLinkError, OverrideEntry,
    OverrideFilter, Provider, ProviderLedgerEntry, RecordUpdate, Result, StateCounts, SyncCursor,
    SyncRun, TransactionRecord, VerificationState, WebhookEvent, WebhookOutcome, WebhookStats,
};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::breaker::BreakerStateRepository;
use crate::health::ports::{AlertFilter, AlertRepository};
use crate::overrides::OverrideLogRepository;
use crate::reconciliation::ports::{
    IntegrationRepository, LedgerRepository, SyncRunRepository, TransactionFilter,
    TransactionRepository,
};
use crate::webhooks::WebhookEventRepository;

#[derive(Default)]
struct Tables {
    integrations: HashMap<Uuid, Integration>,
    transactions: HashMap<Uuid, TransactionRecord>,
    ledger: HashMap<(Uuid, String), ProviderLedgerEntry>,
    sync_runs: Vec<SyncRun>,
    webhooks: Vec<WebhookEvent>,
    alerts: Vec<Alert>,
    overrides: Vec<OverrideEntry>,
    breakers: HashMap<Uuid, BreakerSnapshot>,
}

/// Shared in-memory store backing all ports in tests
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an integration directly
    pub fn put_integration(&self, integration: Integration) {
        self.tables.lock().integrations.insert(integration.id, integration);
    }

    /// Seed an expected record directly
    pub fn put_transaction(&self, record: TransactionRecord) {
        self.tables.lock().transactions.insert(record.id, record);
    }

    pub fn integration(&self, id: Uuid) -> Option<Integration> {
        self.tables.lock().integrations.get(&id).cloned()
    }

    pub fn transaction(&self, id: Uuid) -> Option<TransactionRecord> {
        self.tables.lock().transactions.get(&id).cloned()
    }

    pub fn ledger_entries(&self) -> Vec<ProviderLedgerEntry> {
        self.tables.lock().ledger.values().cloned().collect()
    }

    pub fn sync_runs(&self) -> Vec<SyncRun> {
        self.tables.lock().sync_runs.clone()
    }

    pub fn webhook_events(&self) -> Vec<WebhookEvent> {
        self.tables.lock().webhooks.clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.tables.lock().alerts.clone()
    }

    pub fn override_entries(&self) -> Vec<OverrideEntry> {
        self.tables.lock().overrides.clone()
    }

    pub fn breaker_snapshot(&self, integration_id: Uuid) -> Option<BreakerSnapshot> {
        self.tables.lock().breakers.get(&integration_id).cloned()
    }
}

fn take<T>(items: impl Iterator<Item = T>, limit: u32) -> Vec<T> {
    items.take(usize::try_from(limit).unwrap_or(usize::MAX)).collect()
}

#[async_trait]
impl IntegrationRepository for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Integration>> {
        Ok(self.integration(id))
    }

    async fn list(&self) -> Result<Vec<Integration>> {
        let mut all: Vec<_> = self.tables.lock().integrations.values().cloned().collect();
        all.sort_by_key(|i| i.created_at);
        Ok(all)
    }

    async fn insert(&self, integration: &Integration) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.integrations.contains_key(&integration.id) {
            return Err(LedgerLinkError::Database(format!(
                "integration {} already exists",
                integration.id
            )));
        }
        tables.integrations.insert(integration.id, integration.clone());
        Ok(())
    }

    async fn save(&self, integration: &Integration) -> Result<()> {
        let mut tables = self.tables.lock();
        let stored = tables
            .integrations
            .get_mut(&integration.id)
            .ok_or_else(|| LedgerLinkError::not_found(format!("integration {}", integration.id)))?;
        stored.credential_ref.clone_from(&integration.credential_ref);
        stored.sync_interval_secs = integration.sync_interval_secs;
        stored.retry_policy = integration.retry_policy.clone();
        stored.enabled = integration.enabled;
        stored.status = integration.status;
        stored.updated_at = integration.updated_at;
        Ok(())
    }

    async fn update_cursor(&self, id: Uuid, cursor: &SyncCursor, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock();
        let stored = tables
            .integrations
            .get_mut(&id)
            .ok_or_else(|| LedgerLinkError::not_found(format!("integration {id}")))?;
        stored.cursor = Some(cursor.clone());
        stored.updated_at = at;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: IntegrationStatus, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock();
        let stored = tables
            .integrations
            .get_mut(&id)
            .ok_or_else(|| LedgerLinkError::not_found(format!("integration {id}")))?;
        stored.status = status;
        stored.updated_at = at;
        Ok(())
    }

    async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock();
        let stored = tables
            .integrations
            .get_mut(&id)
            .ok_or_else(|| LedgerLinkError::not_found(format!("integration {id}")))?;
        stored.last_synced_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for InMemoryStore {
    async fn insert(&self, record: &TransactionRecord) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.transactions.contains_key(&record.id) {
            return Err(LedgerLinkError::validation(format!("transaction {} already exists", record.id)));
        }
        tables.transactions.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<TransactionRecord>> {
        Ok(self.transaction(id))
    }

    async fn find_by_provider_txn(
        &self,
        integration_id: Uuid,
        provider_txn_id: &str,
    ) -> Result<Option<TransactionRecord>> {
        Ok(self
            .tables
            .lock()
            .transactions
            .values()
            .find(|r| {
                r.integration_id == integration_id
                    && r.matched_provider_txn_id.as_deref() == Some(provider_txn_id)
            })
            .cloned())
    }

    async fn pending_candidates(
        &self,
        integration_id: Uuid,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .tables
            .lock()
            .transactions
            .values()
            .filter(|r| {
                r.integration_id == integration_id
                    && r.is_pending()
                    && r.currency == currency
                    && r.created_at >= from
                    && r.created_at <= to
            })
            .cloned()
            .collect())
    }

    async fn due_for_retry(
        &self,
        integration_id: Uuid,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TransactionRecord>> {
        let mut due: Vec<_> = self
            .tables
            .lock()
            .transactions
            .values()
            .filter(|r| {
                r.integration_id == integration_id
                    && r.is_pending()
                    && r.created_at <= created_before
                    && r.next_attempt_at.is_none_or(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.created_at, r.id));
        Ok(take(due.into_iter(), limit))
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: VerificationState,
        update: &RecordUpdate,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        match tables.transactions.get_mut(&id) {
            Some(record) if record.state == expected => {
                update.apply(record, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn state_counts(
        &self,
        integration_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<StateCounts> {
        let tables = self.tables.lock();
        let mut counts = StateCounts::default();
        tables
            .transactions
            .values()
            .filter(|r| r.integration_id == integration_id)
            .filter(|r| since.is_none_or(|since| r.created_at >= since))
            .for_each(|r| counts.add(r.state));
        Ok(counts)
    }

    async fn list(&self, filter: &TransactionFilter) -> Result<Vec<TransactionRecord>> {
        let mut records: Vec<_> = self
            .tables
            .lock()
            .transactions
            .values()
            .filter(|r| filter.integration_id.is_none_or(|id| r.integration_id == id))
            .filter(|r| filter.state.is_none_or(|state| r.state == state))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(take(records.into_iter(), filter.limit))
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn find(
        &self,
        integration_id: Uuid,
        provider_txn_id: &str,
    ) -> Result<Option<ProviderLedgerEntry>> {
        Ok(self
            .tables
            .lock()
            .ledger
            .get(&(integration_id, provider_txn_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, entry: &ProviderLedgerEntry) -> Result<()> {
        self.tables
            .lock()
            .ledger
            .insert((entry.integration_id, entry.provider_txn_id.clone()), entry.clone());
        Ok(())
    }

    async fn list(&self, integration_id: Uuid, limit: u32) -> Result<Vec<ProviderLedgerEntry>> {
        let mut entries: Vec<_> = self
            .tables
            .lock()
            .ledger
            .values()
            .filter(|e| e.integration_id == integration_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(take(entries.into_iter(), limit))
    }
}

#[async_trait]
impl SyncRunRepository for InMemoryStore {
    async fn record(&self, run: &SyncRun) -> Result<()> {
        self.tables.lock().sync_runs.push(run.clone());
        Ok(())
    }

    async fn latest(&self, integration_id: Uuid) -> Result<Option<SyncRun>> {
        Ok(self
            .tables
            .lock()
            .sync_runs
            .iter()
            .filter(|r| r.integration_id == integration_id)
            .max_by_key(|r| r.finished_at)
            .cloned())
    }

    async fn list(&self, integration_id: Uuid, limit: u32) -> Result<Vec<SyncRun>> {
        let tables = self.tables.lock();
        let runs = tables.sync_runs.iter().rev().filter(|r| r.integration_id == integration_id).cloned();
        Ok(take(runs, limit))
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryStore {
    async fn insert_claimed(&self, event: &WebhookEvent) -> Result<bool> {
        let mut tables = self.tables.lock();
        let taken = tables.webhooks.iter().any(|e| {
            e.provider == event.provider && e.event_id == event.event_id && e.outcome.claims_key()
        });
        if taken {
            return Ok(false);
        }
        tables.webhooks.push(event.clone());
        Ok(true)
    }

    async fn insert(&self, event: &WebhookEvent) -> Result<()> {
        self.tables.lock().webhooks.push(event.clone());
        Ok(())
    }

    async fn update(&self, event: &WebhookEvent) -> Result<()> {
        let mut tables = self.tables.lock();
        let stored = tables
            .webhooks
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| LedgerLinkError::not_found(format!("webhook event {}", event.id)))?;
        *stored = event.clone();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>> {
        Ok(self.tables.lock().webhooks.iter().find(|e| e.id == id).cloned())
    }

    async fn find_claimed(&self, provider: Provider, event_id: &str) -> Result<Option<WebhookEvent>> {
        Ok(self
            .tables
            .lock()
            .webhooks
            .iter()
            .find(|e| e.provider == provider && e.event_id == event_id && e.outcome.claims_key())
            .cloned())
    }

    #[allow(clippy::cast_precision_loss)]
    async fn stats(
        &self,
        integration_id: Uuid,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<WebhookStats> {
        let tables = self.tables.lock();
        let mut stats = WebhookStats::default();
        let mut latency_total = 0_u64;
        let mut latency_samples = 0_u64;
        for event in tables
            .webhooks
            .iter()
            .filter(|e| e.integration_id == integration_id)
            .filter(|e| e.received_at >= since && e.received_at <= now)
        {
            stats.total += 1;
            match event.outcome {
                WebhookOutcome::Accepted => stats.accepted += 1,
                WebhookOutcome::Duplicate => stats.duplicate += 1,
                WebhookOutcome::Rejected => stats.rejected += 1,
                WebhookOutcome::Errored => stats.errored += 1,
            }
            if !event.signature_valid {
                stats.signature_failures += 1;
            }
            if let Some(latency) = event.latency_ms {
                latency_total += latency;
                latency_samples += 1;
            }
        }
        if latency_samples > 0 {
            stats.average_latency_ms = latency_total as f64 / latency_samples as f64;
        }
        let minutes = (now - since).num_seconds() as f64 / 60.0;
        if minutes > 0.0 {
            stats.deliveries_per_minute = stats.total as f64 / minutes;
        }
        Ok(stats)
    }

    async fn list(&self, integration_id: Uuid, limit: u32) -> Result<Vec<WebhookEvent>> {
        let tables = self.tables.lock();
        let events = tables.webhooks.iter().rev().filter(|e| e.integration_id == integration_id).cloned();
        Ok(take(events, limit))
    }
}

#[async_trait]
impl AlertRepository for InMemoryStore {
    async fn open_if_absent(&self, alert: &Alert) -> Result<bool> {
        let mut tables = self.tables.lock();
        let open = tables.alerts.iter().any(|a| {
            a.integration_id == alert.integration_id && a.kind == alert.kind && a.resolved_at.is_none()
        });
        if open {
            return Ok(false);
        }
        tables.alerts.push(alert.clone());
        Ok(true)
    }

    async fn resolve(&self, integration_id: Uuid, kind: AlertKind, at: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock();
        let open = tables
            .alerts
            .iter_mut()
            .find(|a| a.integration_id == integration_id && a.kind == kind && a.resolved_at.is_none());
        Ok(open.is_some_and(|alert| {
            alert.resolved_at = Some(at);
            true
        }))
    }

    async fn open_for(&self, integration_id: Uuid) -> Result<Vec<Alert>> {
        Ok(self
            .tables
            .lock()
            .alerts
            .iter()
            .filter(|a| a.integration_id == integration_id && a.resolved_at.is_none())
            .cloned()
            .collect())
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let tables = self.tables.lock();
        let alerts = tables
            .alerts
            .iter()
            .rev()
            .filter(|a| filter.integration_id.is_none_or(|id| a.integration_id == id))
            .filter(|a| !filter.open_only || a.resolved_at.is_none())
            .cloned();
        Ok(take(alerts, filter.limit))
    }
}

#[async_trait]
impl OverrideLogRepository for InMemoryStore {
    async fn append(&self, entry: &OverrideEntry) -> Result<()> {
        self.tables.lock().overrides.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, filter: &OverrideFilter) -> Result<Vec<OverrideEntry>> {
        let tables = self.tables.lock();
        let entries = tables.overrides.iter().rev().filter(|e| filter.matches(e)).cloned();
        Ok(take(entries, filter.effective_limit()))
    }

    async fn count_since(&self, integration_id: Uuid, since: DateTime<Utc>) -> Result<u64> {
        let tables = self.tables.lock();
        let count = tables
            .overrides
            .iter()
            .filter(|e| e.integration_id == integration_id && e.created_at >= since)
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl BreakerStateRepository for InMemoryStore {
    async fn load(&self, integration_id: Uuid) -> Result<Option<BreakerSnapshot>> {
        Ok(self.breaker_snapshot(integration_id))
    }

    async fn save(&self, integration_id: Uuid, snapshot: &BreakerSnapshot) -> Result<()> {
        self.tables.lock().breakers.insert(integration_id, snapshot.clone());
        Ok(())
    }
}
