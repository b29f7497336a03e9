//! Alert listing

use ledgerlink_core::AlertFilter;
use ledgerlink_domain::{Alert, Result};
use serde::Deserialize;
use uuid::Uuid;

use crate::context::AppContext;
use crate::utils::command_helpers::execute_command;

const DEFAULT_ALERT_LIMIT: u32 = 100;
const MAX_ALERT_LIMIT: u32 = 1_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertsQuery {
    pub integration_id: Option<Uuid>,
    pub open_only: bool,
    pub limit: Option<u32>,
}

impl AlertsQuery {
    fn into_filter(self) -> AlertFilter {
        AlertFilter {
            integration_id: self.integration_id,
            open_only: self.open_only,
            limit: self.limit.unwrap_or(DEFAULT_ALERT_LIMIT).clamp(1, MAX_ALERT_LIMIT),
        }
    }
}

/// Alerts, newest first
pub async fn list_alerts(ctx: &AppContext, query: AlertsQuery) -> Result<Vec<Alert>> {
    let filter = query.into_filter();
    execute_command("alerts::list_alerts", || async { ctx.alert_log.list(&filter).await }).await
}
