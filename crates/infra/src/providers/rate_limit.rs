//! Last observed rate-limit headroom of a provider account

use parking_lot::Mutex;

/// Tracks the remaining request budget as a fraction in `[0, 1]`
///
/// Providers that publish a call-limit header update it from every response.
/// Providers that do not are only observed through throttling: a 429 drops the
/// headroom to zero and the next successful call restores it to one.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    headroom: Mutex<Option<f64>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headroom(&self) -> Option<f64> {
        *self.headroom.lock()
    }

    /// Record `used` of `limit` calls consumed
    #[allow(clippy::cast_precision_loss)]
    pub fn observe_usage(&self, used: u64, limit: u64) {
        if limit == 0 {
            return;
        }
        let remaining = limit.saturating_sub(used) as f64 / limit as f64;
        *self.headroom.lock() = Some(remaining.clamp(0.0, 1.0));
    }

    /// Parse a `used/limit` header value such as Shopify's `32/40`
    pub fn observe_usage_header(&self, value: &str) -> bool {
        let Some((used, limit)) = value.trim().split_once('/') else {
            return false;
        };
        match (used.trim().parse::<u64>(), limit.trim().parse::<u64>()) {
            (Ok(used), Ok(limit)) => {
                self.observe_usage(used, limit);
                true
            }
            _ => false,
        }
    }

    pub fn observe_throttled(&self) {
        *self.headroom.lock() = Some(0.0);
    }

    pub fn observe_success(&self) {
        *self.headroom.lock() = Some(1.0);
    }
}
