//! Port interface for webhook delivery persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_domain::{Provider, Result, WebhookEvent, WebhookStats};
use uuid::Uuid;

/// Webhook event persistence
///
/// At most one `accepted | errored` row may exist per (provider, event id);
/// `insert_claimed` is the atomic gate enforcing it.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Insert an event that claims its idempotency key
    ///
    /// Returns `false` without writing when the key is already claimed.
    async fn insert_claimed(&self, event: &WebhookEvent) -> Result<bool>;

    /// Insert a non-claiming row (`duplicate` or `rejected`)
    async fn insert(&self, event: &WebhookEvent) -> Result<()>;

    /// Persist outcome, error, retained payload and processing timestamps
    async fn update(&self, event: &WebhookEvent) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>>;

    /// The row currently holding (provider, event id)
    async fn find_claimed(&self, provider: Provider, event_id: &str) -> Result<Option<WebhookEvent>>;

    /// Delivery statistics for events received in `[since, now]`
    async fn stats(
        &self,
        integration_id: Uuid,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<WebhookStats>;

    async fn list(&self, integration_id: Uuid, limit: u32) -> Result<Vec<WebhookEvent>>;
}
