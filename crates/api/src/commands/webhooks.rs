//! Inbound webhook deliveries

use ledgerlink_domain::{InboundWebhook, Result, WebhookReceipt};
use uuid::Uuid;

use crate::context::AppContext;
use crate::utils::command_helpers::execute_command;

/// Verify, deduplicate and reconcile one delivery
pub async fn receive_webhook(ctx: &AppContext, delivery: InboundWebhook) -> Result<WebhookReceipt> {
    execute_command("webhooks::receive_webhook", || ctx.webhooks.ingest(delivery)).await
}

/// Re-run an `errored` delivery from its retained payload
pub async fn replay_webhook(ctx: &AppContext, record_id: Uuid) -> Result<WebhookReceipt> {
    execute_command("webhooks::replay_webhook", || ctx.webhooks.replay(record_id)).await
}
