//! Webhook delivery tracking
//!
//! Every delivery leaves exactly one persisted row. Only `accepted` and
//! `errored` rows hold the (provider, event id) key, so a redelivery of a
//! processed event is recorded as `duplicate` and never reconciled twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledgerlink_domain::constants::{
    MALFORMED_EVENT_PREFIX, SYNTHETIC_EVENT_HASH_CHARS, UNVERIFIED_EVENT_PREFIX,
};
use ledgerlink_domain::{
    payload_hash, AlertKind, InboundWebhook, Integration, LedgerLinkError, ProviderWebhook,
    RejectReason, Result, WebhookEvent, WebhookOutcome, WebhookReceipt,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::ports::WebhookEventRepository;
use crate::health::AlertManager;
use crate::reconciliation::ReconciliationEngine;
use crate::SharedClock;

/// Verifies, deduplicates and reconciles inbound webhook deliveries
pub struct WebhookTracker {
    events: Arc<dyn WebhookEventRepository>,
    engine: Arc<ReconciliationEngine>,
    alerts: Arc<AlertManager>,
    clock: SharedClock,
}

impl WebhookTracker {
    pub fn new(
        events: Arc<dyn WebhookEventRepository>,
        engine: Arc<ReconciliationEngine>,
        alerts: Arc<AlertManager>,
        clock: SharedClock,
    ) -> Self {
        Self { events, engine, alerts, clock }
    }

    /// Process one delivery
    ///
    /// `Err` is reserved for unknown integrations and storage failures; every
    /// other outcome is reported in the receipt.
    #[instrument(
        skip(self, delivery),
        fields(provider = %delivery.provider, integration_id = %delivery.integration_id)
    )]
    pub async fn ingest(&self, delivery: InboundWebhook) -> Result<WebhookReceipt> {
        let received_at = self.clock.now();
        let integration = self.load_integration(delivery.integration_id).await?;
        if integration.provider != delivery.provider {
            return Err(LedgerLinkError::not_found(format!(
                "{} integration {}",
                delivery.provider, delivery.integration_id
            )));
        }

        let adapter = self.engine.ports().adapters.adapter_for(&integration).await?;
        let hash = payload_hash(&delivery.raw_payload);

        if !adapter.verify_webhook(&delivery.raw_payload, delivery.signature.as_deref()) {
            let event_id = synthetic_event_id(UNVERIFIED_EVENT_PREFIX, &hash);
            let mut event = new_event(&delivery, event_id, false, received_at, hash);
            event.outcome = WebhookOutcome::Rejected;
            event.error = Some("signature verification failed".to_string());
            event.finish(self.clock.now());
            self.events.insert(&event).await?;

            warn!(event_id = %event.event_id, "webhook rejected: invalid signature");
            self.alerts
                .raise_quietly(
                    integration.id,
                    AlertKind::WebhookSignature,
                    "webhook delivery failed signature verification",
                )
                .await;
            return Ok(self.conclude(&event, Some(RejectReason::InvalidSignature), 0));
        }

        let decoded = match adapter.decode_webhook(&delivery.raw_payload, delivery.delivery_id.as_deref()) {
            Ok(decoded) => decoded,
            Err(err) => {
                let event_id = synthetic_event_id(MALFORMED_EVENT_PREFIX, &hash);
                let mut event = new_event(&delivery, event_id, true, received_at, hash);
                event.outcome = WebhookOutcome::Rejected;
                event.error = Some(err.to_string());
                event.finish(self.clock.now());
                self.events.insert(&event).await?;

                warn!(error = %err, "webhook rejected: malformed payload");
                return Ok(self.conclude(&event, Some(RejectReason::Malformed), 0));
            }
        };

        let mut event =
            new_event(&delivery, decoded.event_id().to_string(), true, received_at, hash);
        if !self.events.insert_claimed(&event).await? {
            event.id = Uuid::now_v7();
            event.outcome = WebhookOutcome::Duplicate;
            event.finish(self.clock.now());
            self.events.insert(&event).await?;

            info!(event_id = %event.event_id, "duplicate webhook delivery");
            return Ok(self.conclude(&event, None, 0));
        }

        let processed = self.process(&integration, &decoded).await;
        event.finish(self.clock.now());
        let transactions = match processed {
            Ok(count) => count,
            Err(err) => {
                error!(event_id = %event.event_id, error = %err, "webhook reconciliation failed; payload retained");
                event.outcome = WebhookOutcome::Errored;
                event.error = Some(err.to_string());
                event.raw_payload = Some(String::from_utf8_lossy(&delivery.raw_payload).into_owned());
                0
            }
        };
        self.events.update(&event).await?;
        Ok(self.conclude(&event, None, transactions))
    }

    /// Re-run reconciliation of an `errored` delivery from its retained
    /// payload
    #[instrument(skip(self))]
    pub async fn replay(&self, record_id: Uuid) -> Result<WebhookReceipt> {
        let mut event = self
            .events
            .get(record_id)
            .await?
            .ok_or_else(|| LedgerLinkError::not_found(format!("webhook event {record_id}")))?;
        if event.outcome != WebhookOutcome::Errored {
            return Err(LedgerLinkError::validation(format!(
                "only errored deliveries can be replayed; event is {}",
                event.outcome
            )));
        }
        let raw = event
            .raw_payload
            .clone()
            .ok_or_else(|| LedgerLinkError::validation("no payload retained for replay"))?;

        let integration = self.load_integration(event.integration_id).await?;
        let adapter = self.engine.ports().adapters.adapter_for(&integration).await?;
        let processed = match adapter.decode_webhook(raw.as_bytes(), Some(&event.event_id)) {
            Ok(decoded) => self.process(&integration, &decoded).await,
            Err(err) => Err(err),
        };

        event.processed_at = Some(self.clock.now());
        let transactions = match processed {
            Ok(count) => {
                info!(event_id = %event.event_id, "replayed webhook accepted");
                event.outcome = WebhookOutcome::Accepted;
                event.error = None;
                event.raw_payload = None;
                count
            }
            Err(err) => {
                warn!(event_id = %event.event_id, error = %err, "webhook replay failed");
                event.error = Some(err.to_string());
                0
            }
        };
        self.events.update(&event).await?;
        Ok(self.conclude(&event, None, transactions))
    }

    async fn process(&self, integration: &Integration, decoded: &ProviderWebhook) -> Result<usize> {
        let transactions = decoded.normalize(&integration.business_id)?;
        let counts = self.engine.reconcile_transactions(integration, &transactions).await?;
        info!(
            event_id = decoded.event_id(),
            transactions = transactions.len(),
            matched = counts.matched + counts.ambiguous,
            unexpected = counts.unexpected,
            "webhook reconciled"
        );
        Ok(transactions.len())
    }

    fn conclude(
        &self,
        event: &WebhookEvent,
        reject_reason: Option<RejectReason>,
        transactions: usize,
    ) -> WebhookReceipt {
        self.engine.ports().metrics.record_webhook(event.provider, event.outcome);
        WebhookReceipt {
            record_id: event.id,
            event_id: event.event_id.clone(),
            outcome: event.outcome,
            reject_reason,
            error: event.error.clone(),
            transactions,
        }
    }

    async fn load_integration(&self, id: Uuid) -> Result<Integration> {
        self.engine
            .ports()
            .integrations
            .get(id)
            .await?
            .ok_or_else(|| LedgerLinkError::not_found(format!("integration {id}")))
    }
}

fn synthetic_event_id(prefix: &str, hash: &str) -> String {
    let end = hash.len().min(SYNTHETIC_EVENT_HASH_CHARS);
    format!("{prefix}{}", &hash[..end])
}

fn new_event(
    delivery: &InboundWebhook,
    event_id: String,
    signature_valid: bool,
    received_at: DateTime<Utc>,
    payload_hash: String,
) -> WebhookEvent {
    WebhookEvent {
        id: Uuid::now_v7(),
        provider: delivery.provider,
        integration_id: delivery.integration_id,
        event_id,
        signature_valid,
        received_at,
        processed_at: None,
        latency_ms: None,
        outcome: WebhookOutcome::Accepted,
        error: None,
        raw_payload: None,
        payload_hash,
    }
}
