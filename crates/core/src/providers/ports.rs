//! Port interfaces for POS provider adapters

use std::sync::Arc;

use async_trait::async_trait;
use ledgerlink_domain::{
    FetchPage, FetchWindow, Integration, Provider, ProviderWebhook, Result, SyncCursor,
};
use uuid::Uuid;

/// Uniform contract implemented once per POS provider
///
/// Adapters page from `cursor` when one is given (its token when present,
/// otherwise its watermark) and from `window.start` otherwise; `window.end`
/// bounds the results. Fetching is idempotent for a given cursor. Failures are
/// classified `LedgerLinkError`s, never opaque.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider this adapter talks to
    fn provider(&self) -> Provider;

    /// Fetch one page of settled transactions, ordered by occurrence
    async fn fetch_transactions(
        &self,
        cursor: Option<&SyncCursor>,
        window: &FetchWindow,
    ) -> Result<FetchPage>;

    /// Check the provider signature over the raw body
    fn verify_webhook(&self, raw_payload: &[u8], signature: Option<&str>) -> bool;

    /// Decode a verified webhook into the provider's payload variant
    fn decode_webhook(
        &self,
        raw_payload: &[u8],
        delivery_id: Option<&str>,
    ) -> Result<ProviderWebhook> {
        ProviderWebhook::decode(self.provider(), raw_payload, delivery_id)
    }

    /// Remaining rate-limit budget as a fraction in `[0, 1]`, if known
    fn rate_limit_headroom(&self) -> Option<f64>;
}

/// Builds and caches one adapter per integration
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Adapter for `integration`, built on first use
    async fn adapter_for(&self, integration: &Integration) -> Result<Arc<dyn ProviderAdapter>>;

    /// Drop the cached adapter so the next call rebuilds it
    fn invalidate(&self, integration_id: Uuid);

    /// Headroom reported by the cached adapter, without building one
    fn cached_headroom(&self, integration_id: Uuid) -> Option<f64>;
}
