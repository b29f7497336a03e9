//! Port interface for alert persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_domain::{Alert, AlertKind, Result};
use uuid::Uuid;

/// Filter for listing alerts, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertFilter {
    pub integration_id: Option<Uuid>,
    pub open_only: bool,
    pub limit: u32,
}

/// Alert persistence; alerts are never deleted
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Insert `alert` unless one of its kind is already open for the
    /// integration; returns whether a row was inserted
    async fn open_if_absent(&self, alert: &Alert) -> Result<bool>;

    /// Resolve the open alert of `kind`; returns whether one was open
    async fn resolve(&self, integration_id: Uuid, kind: AlertKind, at: DateTime<Utc>)
        -> Result<bool>;

    async fn open_for(&self, integration_id: Uuid) -> Result<Vec<Alert>>;

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>>;
}
