//! Override service - audited manual interventions
//!
//! Every command appends its [`OverrideEntry`] before the state change it
//! describes becomes visible.

use std::sync::Arc;

use ledgerlink_domain::constants::{MAX_ACTOR_LENGTH, MAX_OVERRIDE_REASON_LENGTH};
use ledgerlink_domain::{
    Integration, IntegrationChanges, LedgerLinkError, OverrideAction, OverrideEntry,
    OverrideFilter, OverrideTarget, RecordUpdate, Result, SyncRequest, TransactionRecord,
    VerificationState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use super::ports::OverrideLogRepository;
use crate::providers::AdapterFactory;
use crate::reconciliation::ports::{IntegrationRepository, TransactionRepository};
use crate::SharedClock;

/// Manual verification of one expected transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideTransaction {
    pub actor: String,
    pub transaction_id: Uuid,
    pub amount_minor: i64,
    pub reason: String,
}

/// Configuration change of one integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconfigureIntegration {
    pub actor: String,
    pub integration_id: Uuid,
    pub changes: IntegrationChanges,
    pub reason: String,
}

/// The only path for out-of-band changes to records and integrations
pub struct OverrideService {
    log: Arc<dyn OverrideLogRepository>,
    integrations: Arc<dyn IntegrationRepository>,
    transactions: Arc<dyn TransactionRepository>,
    adapters: Arc<dyn AdapterFactory>,
    clock: SharedClock,
}

impl OverrideService {
    pub fn new(
        log: Arc<dyn OverrideLogRepository>,
        integrations: Arc<dyn IntegrationRepository>,
        transactions: Arc<dyn TransactionRepository>,
        adapters: Arc<dyn AdapterFactory>,
        clock: SharedClock,
    ) -> Self {
        Self { log, integrations, transactions, adapters, clock }
    }

    /// Mark a record `overridden`
    ///
    /// Fails with a validation error for an unknown or already overridden
    /// record, a non-positive amount, or a missing reason.
    #[instrument(skip(self, command), fields(transaction_id = %command.transaction_id, actor = %command.actor))]
    pub async fn override_transaction(&self, command: OverrideTransaction) -> Result<TransactionRecord> {
        validate_actor_and_reason(&command.actor, &command.reason)?;
        if command.amount_minor <= 0 {
            return Err(LedgerLinkError::validation("amount_minor must be positive"));
        }

        let id = command.transaction_id;
        let mut current = self
            .transactions
            .get(id)
            .await?
            .ok_or_else(|| LedgerLinkError::validation(format!("unknown transaction {id}")))?;
        if current.state == VerificationState::Overridden {
            return Err(LedgerLinkError::validation(format!("transaction {id} is already overridden")));
        }

        let now = self.clock.now();
        let entry = OverrideEntry {
            id: Uuid::now_v7(),
            actor: command.actor.trim().to_string(),
            action: OverrideAction::ManualVerification,
            target: OverrideTarget::Transaction(id),
            integration_id: current.integration_id,
            business_id: current.business_id.clone(),
            reason: command.reason.trim().to_string(),
            details: json!({
                "previous_state": current.state,
                "failure_reason": current.failure_reason,
                "record_amount_minor": current.amount_minor,
                "override_amount_minor": command.amount_minor,
            }),
            created_at: now,
        };
        self.log.append(&entry).await?;

        let update = RecordUpdate::MarkOverridden { amount_minor: command.amount_minor };
        while !self.transactions.compare_and_set(id, current.state, &update, now).await? {
            current = self
                .transactions
                .get(id)
                .await?
                .ok_or_else(|| LedgerLinkError::validation(format!("unknown transaction {id}")))?;
            if current.state == VerificationState::Overridden {
                return Err(LedgerLinkError::validation(format!(
                    "transaction {id} was overridden concurrently"
                )));
            }
        }

        info!(entry_id = %entry.id, previous_state = %entry.details["previous_state"], "transaction overridden");
        self.transactions
            .get(id)
            .await?
            .ok_or_else(|| LedgerLinkError::Internal(format!("transaction {id} vanished after override")))
    }

    /// Apply configuration changes and return the integration to `active`
    #[instrument(skip(self, command), fields(integration_id = %command.integration_id, actor = %command.actor))]
    pub async fn reconfigure_integration(&self, command: ReconfigureIntegration) -> Result<Integration> {
        validate_actor_and_reason(&command.actor, &command.reason)?;
        command.changes.validate()?;

        let id = command.integration_id;
        let mut integration = self
            .integrations
            .get(id)
            .await?
            .ok_or_else(|| LedgerLinkError::not_found(format!("integration {id}")))?;

        let now = self.clock.now();
        let entry = OverrideEntry {
            id: Uuid::now_v7(),
            actor: command.actor.trim().to_string(),
            action: OverrideAction::Reconfiguration,
            target: OverrideTarget::Integration(id),
            integration_id: id,
            business_id: integration.business_id.clone(),
            reason: command.reason.trim().to_string(),
            details: json!({
                "changes": command.changes,
                "previous": {
                    "credential_ref": integration.credential_ref,
                    "sync_interval_secs": integration.sync_interval_secs,
                    "retry_policy": integration.retry_policy,
                    "enabled": integration.enabled,
                    "status": integration.status.to_string(),
                },
            }),
            created_at: now,
        };
        self.log.append(&entry).await?;

        command.changes.apply_to(&mut integration, now);
        self.integrations.save(&integration).await?;
        self.adapters.invalidate(id);

        info!(entry_id = %entry.id, "integration reconfigured");
        Ok(integration)
    }

    /// Audit a forced sync before it is scheduled
    pub async fn record_forced_sync(
        &self,
        actor: &str,
        integration: &Integration,
        request: &SyncRequest,
        reason: Option<&str>,
    ) -> Result<OverrideEntry> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty()).unwrap_or("manual sync requested");
        validate_actor_and_reason(actor, reason)?;

        let entry = OverrideEntry {
            id: Uuid::now_v7(),
            actor: actor.trim().to_string(),
            action: OverrideAction::ForcedSync,
            target: OverrideTarget::Integration(integration.id),
            integration_id: integration.id,
            business_id: integration.business_id.clone(),
            reason: reason.to_string(),
            details: json!({
                "operation_id": request.operation_id,
                "mode": request.mode,
                "priority": request.priority,
            }),
            created_at: self.clock.now(),
        };
        self.log.append(&entry).await?;
        info!(integration_id = %integration.id, operation_id = %request.operation_id, "forced sync recorded");
        Ok(entry)
    }

    /// Recent entries, newest first
    pub async fn recent(&self, filter: &OverrideFilter) -> Result<Vec<OverrideEntry>> {
        self.log.recent(filter).await
    }
}

fn validate_actor_and_reason(actor: &str, reason: &str) -> Result<()> {
    let actor = actor.trim();
    if actor.is_empty() {
        return Err(LedgerLinkError::validation("actor must not be empty"));
    }
    if actor.len() > MAX_ACTOR_LENGTH {
        return Err(LedgerLinkError::validation(format!(
            "actor must be at most {MAX_ACTOR_LENGTH} characters"
        )));
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerLinkError::validation("reason must not be empty"));
    }
    if reason.len() > MAX_OVERRIDE_REASON_LENGTH {
        return Err(LedgerLinkError::validation(format!(
            "reason must be at most {MAX_OVERRIDE_REASON_LENGTH} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_and_reason_validation() {
        assert!(validate_actor_and_reason("ops@example.com", "customer provided receipt").is_ok());
        assert!(validate_actor_and_reason("  ", "reason").is_err());
        assert!(validate_actor_and_reason("ops", " ").is_err());
        assert!(validate_actor_and_reason("ops", &"x".repeat(MAX_OVERRIDE_REASON_LENGTH + 1)).is_err());
    }
}
