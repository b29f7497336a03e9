//! Inbound webhook deliveries and their persisted outcome

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::integration::Provider;
use crate::impl_domain_status_conversions;

/// Processing outcome of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Accepted,
    Duplicate,
    Rejected,
    Errored,
}

impl_domain_status_conversions!(WebhookOutcome {
    Accepted => "accepted",
    Duplicate => "duplicate",
    Rejected => "rejected",
    Errored => "errored",
});

impl WebhookOutcome {
    /// Outcomes that hold the (provider, event id) idempotency key
    pub const fn claims_key(self) -> bool {
        matches!(self, Self::Accepted | Self::Errored)
    }
}

/// Why a delivery was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidSignature,
    Malformed,
}

/// A raw delivery as received on the HTTP boundary
#[derive(Debug, Clone)]
pub struct InboundWebhook {
    pub provider: Provider,
    pub integration_id: Uuid,
    pub raw_payload: Vec<u8>,
    pub signature: Option<String>,
    pub delivery_id: Option<String>,
}

/// Persisted delivery row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: Provider,
    pub integration_id: Uuid,
    pub event_id: String,
    pub signature_valid: bool,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub outcome: WebhookOutcome,
    pub error: Option<String>,
    /// Retained for `errored` deliveries so they can be replayed
    pub raw_payload: Option<String>,
    pub payload_hash: String,
}

impl WebhookEvent {
    /// Stamp processing completion at `now`
    pub fn finish(&mut self, now: DateTime<Utc>) {
        let latency = (now - self.received_at).num_milliseconds().max(0);
        self.processed_at = Some(now);
        self.latency_ms = Some(u64::try_from(latency).unwrap_or(0));
    }
}

/// Result of handing a delivery to the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookReceipt {
    pub record_id: Uuid,
    pub event_id: String,
    pub outcome: WebhookOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub transactions: usize,
}

/// Delivery statistics over a lookback window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookStats {
    pub total: u64,
    pub accepted: u64,
    pub duplicate: u64,
    pub rejected: u64,
    pub errored: u64,
    pub signature_failures: u64,
    pub average_latency_ms: f64,
    pub deliveries_per_minute: f64,
}

impl WebhookStats {
    /// `(rejected + errored) / total`
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.rejected + self.errored) as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_key() {
        assert!(WebhookOutcome::Accepted.claims_key());
        assert!(WebhookOutcome::Errored.claims_key());
        assert!(!WebhookOutcome::Duplicate.claims_key());
        assert!(!WebhookOutcome::Rejected.claims_key());
    }

    #[test]
    fn test_error_rate() {
        let stats = WebhookStats { total: 10, accepted: 7, rejected: 2, errored: 1, ..Default::default() };
        assert!((stats.error_rate() - 0.3).abs() < 1e-9);
        assert!(WebhookStats::default().error_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_finish_records_latency() {
        let received = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut event = WebhookEvent {
            id: Uuid::now_v7(),
            provider: Provider::Square,
            integration_id: Uuid::now_v7(),
            event_id: "e".into(),
            signature_valid: true,
            received_at: received,
            processed_at: None,
            latency_ms: None,
            outcome: WebhookOutcome::Accepted,
            error: None,
            raw_payload: None,
            payload_hash: String::new(),
        };
        event.finish(received + chrono::Duration::milliseconds(42));
        assert_eq!(event.latency_ms, Some(42));
    }
}
