//! Repository ports owned by the reconciliation engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_domain::{
    Integration, IntegrationStatus, ProviderLedgerEntry, RecordUpdate, Result, StateCounts,
    SyncCursor, SyncRun, TransactionRecord, VerificationState,
};
use uuid::Uuid;

/// Integration persistence
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Integration>>;

    async fn list(&self) -> Result<Vec<Integration>>;

    /// Insert a new integration; fails if the id exists
    async fn insert(&self, integration: &Integration) -> Result<()>;

    /// Persist configuration fields and status
    async fn save(&self, integration: &Integration) -> Result<()>;

    async fn update_cursor(&self, id: Uuid, cursor: &SyncCursor, at: DateTime<Utc>) -> Result<()>;

    async fn set_status(&self, id: Uuid, status: IntegrationStatus, at: DateTime<Utc>)
        -> Result<()>;

    /// Stamp `last_synced_at`
    async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// Filter for listing expected transactions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub integration_id: Option<Uuid>,
    pub state: Option<VerificationState>,
    pub limit: u32,
}

/// Expected-transaction persistence
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, record: &TransactionRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<TransactionRecord>>;

    /// Record already matched to `provider_txn_id`, if any
    async fn find_by_provider_txn(
        &self,
        integration_id: Uuid,
        provider_txn_id: &str,
    ) -> Result<Option<TransactionRecord>>;

    /// Pending records of an integration in `currency` created within
    /// `[from, to]`
    async fn pending_candidates(
        &self,
        integration_id: Uuid,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>>;

    /// Pending records created at or before `created_before` whose next
    /// attempt is due at `now`, oldest first
    async fn due_for_retry(
        &self,
        integration_id: Uuid,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TransactionRecord>>;

    /// Apply `update` only if the record is still in `expected`
    ///
    /// Returns `false` when the guard failed (lost race or wrong state).
    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: VerificationState,
        update: &RecordUpdate,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// State counts for records created at or after `since`
    async fn state_counts(
        &self,
        integration_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<StateCounts>;

    async fn list(&self, filter: &TransactionFilter) -> Result<Vec<TransactionRecord>>;
}

/// Provider ledger persistence
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn find(
        &self,
        integration_id: Uuid,
        provider_txn_id: &str,
    ) -> Result<Option<ProviderLedgerEntry>>;

    /// Insert, or replace the row with the same (integration, provider txn id)
    async fn upsert(&self, entry: &ProviderLedgerEntry) -> Result<()>;

    async fn list(&self, integration_id: Uuid, limit: u32) -> Result<Vec<ProviderLedgerEntry>>;
}

/// Sync run persistence
#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    async fn record(&self, run: &SyncRun) -> Result<()>;

    /// Most recent run by start time
    async fn latest(&self, integration_id: Uuid) -> Result<Option<SyncRun>>;

    async fn list(&self, integration_id: Uuid, limit: u32) -> Result<Vec<SyncRun>>;
}
