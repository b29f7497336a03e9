//! Integration model: one configured connection between a business and a POS
//! provider.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DEFAULT_SYNC_INTERVAL_SECS;
use crate::{impl_domain_status_conversions, LedgerLinkError, Result};

/// Supported point-of-sale providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Square,
    Shopify,
    Zettle,
}

impl_domain_status_conversions!(Provider {
    Square => "square",
    Shopify => "shopify",
    Zettle => "zettle",
});

impl Provider {
    pub const ALL: [Self; 3] = [Self::Square, Self::Shopify, Self::Zettle];
}

/// Operational status of an integration, orthogonal to `enabled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    #[default]
    Active,
    /// Provider rejected the credentials; waits for reconfiguration
    NeedsReauth,
    /// A fatal invariant violation stopped syncing
    Halted,
}

impl_domain_status_conversions!(IntegrationStatus {
    Active => "active",
    NeedsReauth => "needs_reauth",
    Halted => "halted",
});

/// Position in provider history up to which transactions are reconciled
///
/// Cursors are ordered by `watermark`; `token` is an opaque provider page token
/// handed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub watermark: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SyncCursor {
    pub const fn new(watermark: DateTime<Utc>) -> Self {
        Self { watermark, token: None }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// `true` if moving from `previous` to `self` would go backwards
    pub fn regresses_from(&self, previous: &Self) -> bool {
        self.watermark < previous.watermark
    }
}

/// Per-integration retry declaration
///
/// Drives record retries (staleness sweep) and provider fetch retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 2_000, multiplier: 2.0, max_backoff_ms: 60_000 }
    }
}

impl RetryPolicy {
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Backoff after the given one-based attempt count
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn backoff_after(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff_ms as f64);
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            self.max_backoff()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(LedgerLinkError::validation("retry_policy.max_attempts must be at least 1"));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(LedgerLinkError::validation("retry_policy.multiplier must be >= 1.0"));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(LedgerLinkError::validation(
                "retry_policy.max_backoff_ms must not be below initial_backoff_ms",
            ));
        }
        Ok(())
    }
}

/// A (business, provider) integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    pub business_id: String,
    pub provider: Provider,
    /// Indirection to the secret (`env:NAME` / `file:PATH`), never the secret
    pub credential_ref: String,
    pub cursor: Option<SyncCursor>,
    pub sync_interval_secs: u64,
    pub retry_policy: RetryPolicy,
    pub enabled: bool,
    pub status: IntegrationStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    pub fn new(
        business_id: impl Into<String>,
        provider: Provider,
        credential_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            business_id: business_id.into(),
            provider,
            credential_ref: credential_ref.into(),
            cursor: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            retry_policy: RetryPolicy::default(),
            enabled: true,
            status: IntegrationStatus::Active,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enabled and not blocked by a status that needs an operator
    pub fn can_sync(&self) -> bool {
        self.enabled && self.status == IntegrationStatus::Active
    }

    /// Whether a scheduled sync is due at `now`
    pub fn sync_due(&self, now: DateTime<Utc>) -> bool {
        let interval = i64::try_from(self.sync_interval_secs).unwrap_or(i64::MAX);
        self.last_synced_at.is_none_or(|last| (now - last).num_seconds() >= interval)
    }
}

/// Requested changes to an integration's configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationChanges {
    pub credential_ref: Option<String>,
    pub sync_interval_secs: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
    pub enabled: Option<bool>,
}

impl IntegrationChanges {
    pub const fn is_empty(&self) -> bool {
        self.credential_ref.is_none()
            && self.sync_interval_secs.is_none()
            && self.retry_policy.is_none()
            && self.enabled.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(LedgerLinkError::validation("reconfiguration requires at least one change"));
        }
        if let Some(credential_ref) = &self.credential_ref {
            if credential_ref.trim().is_empty() {
                return Err(LedgerLinkError::validation("credential_ref must not be empty"));
            }
        }
        if self.sync_interval_secs == Some(0) {
            return Err(LedgerLinkError::validation("sync_interval_secs must be positive"));
        }
        if let Some(policy) = &self.retry_policy {
            policy.validate()?;
        }
        Ok(())
    }

    /// Apply the changes and return the integration to `Active`
    pub fn apply_to(&self, integration: &mut Integration, now: DateTime<Utc>) {
        if let Some(credential_ref) = &self.credential_ref {
            integration.credential_ref.clone_from(credential_ref);
        }
        if let Some(interval) = self.sync_interval_secs {
            integration.sync_interval_secs = interval;
        }
        if let Some(policy) = &self.retry_policy {
            integration.retry_policy = policy.clone();
        }
        if let Some(enabled) = self.enabled {
            integration.enabled = enabled;
        }
        integration.status = IntegrationStatus::Active;
        integration.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            multiplier: 2.0,
            max_backoff_ms: 350,
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_after(40), Duration::from_millis(350));
    }

    #[test]
    fn test_cursor_regression() {
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let older = SyncCursor::new(t0);
        let newer = SyncCursor::new(t0 + chrono::Duration::seconds(1)).with_token("p2");
        assert!(older.regresses_from(&newer));
        assert!(!newer.regresses_from(&older));
        assert!(!older.regresses_from(&older));
    }

    #[test]
    fn test_changes_validation_and_apply() {
        assert!(IntegrationChanges::default().validate().is_err());

        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut integration = Integration::new("biz-1", Provider::Square, "env:SQ", now);
        integration.status = IntegrationStatus::NeedsReauth;

        let changes = IntegrationChanges {
            credential_ref: Some("env:SQ_ROTATED".into()),
            ..IntegrationChanges::default()
        };
        changes.validate().unwrap();
        changes.apply_to(&mut integration, now);
        assert_eq!(integration.credential_ref, "env:SQ_ROTATED");
        assert_eq!(integration.status, IntegrationStatus::Active);
    }

    #[test]
    fn test_sync_due() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut integration = Integration::new("biz-1", Provider::Zettle, "env:Z", now);
        assert!(integration.sync_due(now));
        integration.last_synced_at = Some(now);
        integration.sync_interval_secs = 60;
        assert!(!integration.sync_due(now + chrono::Duration::seconds(59)));
        assert!(integration.sync_due(now + chrono::Duration::seconds(60)));
    }
}
