//! Scripted provider adapter and a factory serving it

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ledgerlink_domain::{
    FetchPage, FetchWindow, Integration, LedgerLinkError, Provider, ProviderTransaction, Result, SyncCursor,
};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::providers::{AdapterFactory, ProviderAdapter};

/// Provider double backed by an in-memory transaction history
///
/// Queued responses take precedence over the history; once the queue is
/// drained, pages are cut from the history ordered by `occurred_at`.
pub struct FakeProviderAdapter {
    provider: Provider,
    history: Mutex<Vec<ProviderTransaction>>,
    scripted: Mutex<VecDeque<Result<FetchPage>>>,
    delay: Mutex<Option<Duration>>,
    accepted_signature: Mutex<Option<String>>,
    headroom: Mutex<Option<f64>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeProviderAdapter {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            history: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            accepted_signature: Mutex::new(None),
            headroom: Mutex::new(None),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Append transactions to the provider's history
    pub fn push_history(&self, transactions: impl IntoIterator<Item = ProviderTransaction>) {
        let mut history = self.history.lock();
        history.extend(transactions);
        history.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.provider_txn_id.cmp(&b.provider_txn_id)));
    }

    /// Queue a response for the next fetch
    pub fn script(&self, response: Result<FetchPage>) {
        self.scripted.lock().push_back(response);
    }

    /// Queue `count` copies of an error
    pub fn fail_times(&self, count: usize, error: &LedgerLinkError) {
        let mut scripted = self.scripted.lock();
        for _ in 0..count {
            scripted.push_back(Err(error.clone()));
        }
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Only this exact signature verifies; `None` accepts any delivery
    pub fn set_accepted_signature(&self, signature: Option<&str>) {
        *self.accepted_signature.lock() = signature.map(str::to_string);
    }

    pub fn set_headroom(&self, headroom: Option<f64>) {
        *self.headroom.lock() = headroom;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent fetches observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn page_from_history(&self, cursor: Option<&SyncCursor>, window: &FetchWindow) -> FetchPage {
        let history = self.history.lock();
        let limit = usize::try_from(window.limit).unwrap_or(usize::MAX).max(1);
        let mut eligible = history.iter().filter(|txn| {
            let after_start = match cursor {
                Some(cursor) => txn.occurred_at > cursor.watermark,
                None => window.start.is_none_or(|start| txn.occurred_at >= start),
            };
            after_start && window.end.is_none_or(|end| txn.occurred_at <= end)
        });

        let transactions: Vec<_> = eligible.by_ref().take(limit).cloned().collect();
        let has_more = eligible.next().is_some();
        let next_cursor = transactions.last().map(|txn| SyncCursor::new(txn.occurred_at));
        FetchPage { transactions, next_cursor, has_more }
    }
}

#[async_trait]
impl ProviderAdapter for FakeProviderAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch_transactions(
        &self,
        cursor: Option<&SyncCursor>,
        window: &FetchWindow,
    ) -> Result<FetchPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.scripted.lock().pop_front();
        match scripted {
            Some(response) => response,
            None => Ok(self.page_from_history(cursor, window)),
        }
    }

    fn verify_webhook(&self, _raw_payload: &[u8], signature: Option<&str>) -> bool {
        match self.accepted_signature.lock().as_deref() {
            Some(expected) => signature == Some(expected),
            None => true,
        }
    }

    fn rate_limit_headroom(&self) -> Option<f64> {
        *self.headroom.lock()
    }
}

/// Serves pre-registered adapters and counts invalidations
#[derive(Default)]
pub struct StaticAdapterFactory {
    adapters: Mutex<HashMap<Uuid, Arc<FakeProviderAdapter>>>,
    invalidations: AtomicUsize,
}

impl StaticAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, integration_id: Uuid, adapter: Arc<FakeProviderAdapter>) {
        self.adapters.lock().insert(integration_id, adapter);
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdapterFactory for StaticAdapterFactory {
    async fn adapter_for(&self, integration: &Integration) -> Result<Arc<dyn ProviderAdapter>> {
        let adapter = self.adapters.lock().get(&integration.id).cloned();
        match adapter {
            Some(adapter) => Ok(adapter as Arc<dyn ProviderAdapter>),
            None => Err(LedgerLinkError::Config(format!(
                "no adapter registered for integration {}",
                integration.id
            ))),
        }
    }

    fn invalidate(&self, _integration_id: Uuid) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn cached_headroom(&self, integration_id: Uuid) -> Option<f64> {
        self.adapters.lock().get(&integration_id).and_then(|adapter| adapter.rate_limit_headroom())
    }
}
