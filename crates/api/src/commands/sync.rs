//! Forced syncs

use std::sync::Arc;

use ledgerlink_domain::{
    LedgerLinkError, Result, SyncMode, SyncOperationHandle, SyncPriority, SyncRequest, SyncTrigger,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::utils::command_helpers::execute_command;

#[derive(Debug, Clone, Deserialize)]
pub struct ForceSyncRequest {
    pub actor: String,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub priority: SyncPriority,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Audit and schedule a manual sync
///
/// Returns as soon as the request is accepted; the run itself shows up as the
/// integration's last sync run in its health snapshot.
pub async fn force_sync(
    ctx: &AppContext,
    integration_id: Uuid,
    request: ForceSyncRequest,
) -> Result<SyncOperationHandle> {
    execute_command("sync::force_sync", move || async move {
        request.mode.validate()?;
        let integration = ctx
            .integrations
            .get(integration_id)
            .await?
            .ok_or_else(|| LedgerLinkError::not_found(format!("integration {integration_id}")))?;

        let sync = SyncRequest::new(integration.id, SyncTrigger::Manual, request.mode, request.priority);
        ctx.overrides
            .record_forced_sync(&request.actor, &integration, &sync, request.reason.as_deref())
            .await?;

        let handle = SyncOperationHandle {
            operation_id: sync.operation_id,
            integration_id: integration.id,
            mode: sync.mode.clone(),
            priority: sync.priority,
            accepted_at: ctx.clock.now(),
        };

        let engine = Arc::clone(&ctx.engine);
        tokio::spawn(async move {
            let operation_id = sync.operation_id;
            match engine.sync(sync).await {
                Ok(run) => info!(%operation_id, outcome = %run.outcome, "forced sync finished"),
                Err(err) => warn!(%operation_id, error = %err, "forced sync failed"),
            }
        });

        Ok(handle)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_and_priority_default() {
        let request: ForceSyncRequest =
            serde_json::from_value(serde_json::json!({ "actor": "ops" })).expect("parses");
        assert_eq!(request.mode, SyncMode::Incremental);
        assert_eq!(request.priority, SyncPriority::Normal);

        let request: ForceSyncRequest = serde_json::from_value(serde_json::json!({
            "actor": "ops",
            "mode": { "type": "full" },
            "priority": "high"
        }))
        .expect("parses");
        assert_eq!(request.mode, SyncMode::Full);
        assert_eq!(request.priority, SyncPriority::High);
    }
}
