//! Sync requests and persisted sync run summaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::integration::SyncCursor;
use crate::{impl_domain_status_conversions, ErrorKind, LedgerLinkError, Result};

/// What started a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Scheduled,
    Manual,
}

impl_domain_status_conversions!(SyncTrigger {
    Scheduled => "scheduled",
    Manual => "manual",
});

/// Priority of a sync request
///
/// `High` cancels an in-flight sync of the same integration and waits for it;
/// `Normal` is coalesced into the running one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPriority {
    #[default]
    Normal,
    High,
}

impl_domain_status_conversions!(SyncPriority {
    Normal => "normal",
    High => "high",
});

/// Range of provider history a sync covers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMode {
    /// From the stored cursor
    #[default]
    Incremental,
    /// From the beginning of provider history; the cursor still only moves
    /// forward
    Full,
    /// Bounded window; never moves the cursor
    CustomRange { from: DateTime<Utc>, to: DateTime<Utc> },
}

impl SyncMode {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
            Self::CustomRange { .. } => "custom_range",
        }
    }

    pub const fn moves_cursor(&self) -> bool {
        !matches!(self, Self::CustomRange { .. })
    }

    pub fn validate(&self) -> Result<()> {
        if let Self::CustomRange { from, to } = self {
            if from >= to {
                return Err(LedgerLinkError::validation("custom_range requires from < to"));
            }
        }
        Ok(())
    }
}

/// Final outcome of a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed,
    /// Another sync held the lock; nothing ran
    Coalesced,
    /// The circuit breaker short-circuited the provider call
    BreakerOpen,
    Cancelled,
    /// Integration disabled or blocked by status
    Skipped,
    Failed,
}

impl_domain_status_conversions!(SyncOutcome {
    Completed => "completed",
    Coalesced => "coalesced",
    BreakerOpen => "breaker_open",
    Cancelled => "cancelled",
    Skipped => "skipped",
    Failed => "failed",
});

/// A request to sync one integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub operation_id: Uuid,
    pub integration_id: Uuid,
    pub trigger: SyncTrigger,
    pub mode: SyncMode,
    pub priority: SyncPriority,
}

impl SyncRequest {
    pub fn new(integration_id: Uuid, trigger: SyncTrigger, mode: SyncMode, priority: SyncPriority) -> Self {
        Self { operation_id: Uuid::now_v7(), integration_id, trigger, mode, priority }
    }

    pub fn scheduled(integration_id: Uuid) -> Self {
        Self::new(integration_id, SyncTrigger::Scheduled, SyncMode::Incremental, SyncPriority::Normal)
    }
}

/// Handle returned when a forced sync is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperationHandle {
    pub operation_id: Uuid,
    pub integration_id: Uuid,
    pub mode: SyncMode,
    pub priority: SyncPriority,
    pub accepted_at: DateTime<Utc>,
}

/// Per-run classification counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCounts {
    pub pages: u32,
    pub fetched: u32,
    pub matched: u32,
    pub ambiguous: u32,
    pub amount_mismatch: u32,
    pub unexpected: u32,
    pub duplicates: u32,
    pub stale_retried: u32,
    pub stale_failed: u32,
}

/// Persisted summary of one sync operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub operation_id: Uuid,
    pub integration_id: Uuid,
    pub trigger: SyncTrigger,
    pub mode: SyncMode,
    pub priority: SyncPriority,
    pub outcome: SyncOutcome,
    pub counts: SyncCounts,
    pub cursor_before: Option<SyncCursor>,
    pub cursor_after: Option<SyncCursor>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    /// In-flight operation that absorbed a coalesced request
    #[serde(default)]
    pub coalesced_into: Option<Uuid>,
}

impl SyncRun {
    /// Start a run record for `request`
    pub fn begin(request: &SyncRequest, cursor: Option<SyncCursor>, now: DateTime<Utc>) -> Self {
        Self {
            operation_id: request.operation_id,
            integration_id: request.integration_id,
            trigger: request.trigger,
            mode: request.mode.clone(),
            priority: request.priority,
            outcome: SyncOutcome::Completed,
            counts: SyncCounts::default(),
            cursor_after: cursor.clone(),
            cursor_before: cursor,
            started_at: now,
            finished_at: now,
            error_kind: None,
            error: None,
            coalesced_into: None,
        }
    }

    /// Close a request that was folded into the sync already running
    #[must_use]
    pub fn coalesce(mut self, in_flight: Uuid, now: DateTime<Utc>) -> Self {
        self.coalesced_into = Some(in_flight);
        self.finish(SyncOutcome::Coalesced, now)
    }

    #[must_use]
    pub fn finish(mut self, outcome: SyncOutcome, now: DateTime<Utc>) -> Self {
        self.outcome = outcome;
        self.finished_at = now;
        self
    }

    #[must_use]
    pub fn fail(mut self, error: &LedgerLinkError, now: DateTime<Utc>) -> Self {
        self.error_kind = Some(error.kind());
        self.error = Some(error.to_string());
        self.finish(SyncOutcome::Failed, now)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
