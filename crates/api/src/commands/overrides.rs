//! Audited manual interventions

use chrono::{DateTime, Utc};
use ledgerlink_core::{OverrideTransaction, ReconfigureIntegration};
use ledgerlink_domain::{
    Integration, IntegrationChanges, OverrideEntry, OverrideFilter, Result, TransactionRecord,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::context::AppContext;
use crate::utils::command_helpers::execute_command;

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideTransactionRequest {
    pub actor: String,
    pub amount_minor: i64,
    pub reason: String,
}

/// Body of `PATCH /integrations/{id}`: the changes sit next to actor and
/// reason
#[derive(Debug, Clone, Deserialize)]
pub struct ReconfigureIntegrationRequest {
    pub actor: String,
    pub reason: String,
    #[serde(flatten)]
    pub changes: IntegrationChanges,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OverridesQuery {
    pub integration_id: Option<Uuid>,
    pub business_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl From<OverridesQuery> for OverrideFilter {
    fn from(query: OverridesQuery) -> Self {
        Self {
            integration_id: query.integration_id,
            business_id: query.business_id.filter(|id| !id.trim().is_empty()),
            since: query.since,
            limit: query.limit,
        }
    }
}

/// Manually verify one expected transaction
pub async fn override_transaction(
    ctx: &AppContext,
    transaction_id: Uuid,
    request: OverrideTransactionRequest,
) -> Result<TransactionRecord> {
    let command = OverrideTransaction {
        actor: request.actor,
        transaction_id,
        amount_minor: request.amount_minor,
        reason: request.reason,
    };
    execute_command("overrides::override_transaction", || ctx.overrides.override_transaction(command))
        .await
}

/// Change an integration's configuration; always audited
pub async fn reconfigure_integration(
    ctx: &AppContext,
    integration_id: Uuid,
    request: ReconfigureIntegrationRequest,
) -> Result<Integration> {
    let command = ReconfigureIntegration {
        actor: request.actor,
        integration_id,
        changes: request.changes,
        reason: request.reason,
    };
    execute_command("overrides::reconfigure_integration", || {
        ctx.overrides.reconfigure_integration(command)
    })
    .await
}

/// Recent audit entries, newest first
pub async fn list_overrides(ctx: &AppContext, query: OverridesQuery) -> Result<Vec<OverrideEntry>> {
    let filter = OverrideFilter::from(query);
    execute_command("overrides::list_overrides", || async { ctx.overrides.recent(&filter).await }).await
}
