//! Port interface for the override/audit log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_domain::{OverrideEntry, OverrideFilter, Result};
use uuid::Uuid;

/// Append-only audit log
///
/// Entries are never updated or deleted.
#[async_trait]
pub trait OverrideLogRepository: Send + Sync {
    async fn append(&self, entry: &OverrideEntry) -> Result<()>;

    /// Entries matching `filter`, newest first
    async fn recent(&self, filter: &OverrideFilter) -> Result<Vec<OverrideEntry>>;

    async fn count_since(&self, integration_id: Uuid, since: DateTime<Utc>) -> Result<u64>;
}
