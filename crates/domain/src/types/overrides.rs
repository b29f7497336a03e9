//! Append-only audit entries for manual interventions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
use crate::impl_domain_status_conversions;

/// Kind of manual intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    ForcedSync,
    ManualVerification,
    Reconfiguration,
}

impl_domain_status_conversions!(OverrideAction {
    ForcedSync => "forced_sync",
    ManualVerification => "manual_verification",
    Reconfiguration => "reconfiguration",
});

/// What an intervention acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OverrideTarget {
    Transaction(Uuid),
    Integration(Uuid),
}

impl OverrideTarget {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transaction(_) => "transaction",
            Self::Integration(_) => "integration",
        }
    }

    pub const fn id(&self) -> Uuid {
        match self {
            Self::Transaction(id) | Self::Integration(id) => *id,
        }
    }
}

/// One immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub id: Uuid,
    pub actor: String,
    pub action: OverrideAction,
    pub target: OverrideTarget,
    pub integration_id: Uuid,
    pub business_id: String,
    pub reason: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing recent entries, newest first
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideFilter {
    pub integration_id: Option<Uuid>,
    pub business_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl OverrideFilter {
    pub fn for_integration(integration_id: Uuid) -> Self {
        Self { integration_id: Some(integration_id), ..Self::default() }
    }

    /// Effective limit, clamped to the maximum page size
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT)
    }

    pub fn matches(&self, entry: &OverrideEntry) -> bool {
        self.integration_id.is_none_or(|id| entry.integration_id == id)
            && self.business_id.as_deref().is_none_or(|b| entry.business_id == b)
            && self.since.is_none_or(|since| entry.created_at >= since)
    }
}
