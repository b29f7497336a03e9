//! Integration health queries

use ledgerlink_domain::{HealthSnapshot, Result};
use uuid::Uuid;

use crate::context::AppContext;
use crate::utils::command_helpers::execute_command;

/// Health snapshot of one integration
pub async fn integration_health(ctx: &AppContext, integration_id: Uuid) -> Result<HealthSnapshot> {
    execute_command("health::integration_health", || ctx.health.snapshot(integration_id)).await
}

/// Health snapshots of every integration
pub async fn all_integration_health(ctx: &AppContext) -> Result<Vec<HealthSnapshot>> {
    execute_command("health::all_integration_health", || ctx.health.snapshot_all()).await
}
