//! Health classification, alerts and the derived per-integration snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::integration::{IntegrationStatus, Provider};
use super::sync::SyncRun;
use super::transaction::StateCounts;
use super::webhook::WebhookStats;
use crate::impl_domain_status_conversions;

/// Circuit breaker state as seen by health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl_domain_status_conversions!(BreakerState {
    Closed => "closed",
    Open => "open",
    HalfOpen => "half_open",
});

/// Integration health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Offline,
}

impl_domain_status_conversions!(HealthStatus {
    Healthy => "healthy",
    Degraded => "degraded",
    Offline => "offline",
});

/// A condition contributing to a non-healthy classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum HealthReason {
    BreakerOpen,
    BreakerHalfOpen,
    Disabled,
    NeedsReauth,
    Halted,
    SyncFailureRate { rate: f64, threshold: f64 },
    WebhookErrorRate { rate: f64, threshold: f64 },
    RateLimitHeadroom { headroom: f64, threshold: f64 },
}

impl HealthReason {
    /// Whether the reason alone makes the integration offline
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::BreakerOpen | Self::Disabled | Self::NeedsReauth | Self::Halted)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::BreakerOpen => "circuit breaker is open".to_string(),
            Self::BreakerHalfOpen => "circuit breaker is probing recovery".to_string(),
            Self::Disabled => "integration is disabled".to_string(),
            Self::NeedsReauth => "provider rejected credentials".to_string(),
            Self::Halted => "sync halted after an invariant violation".to_string(),
            Self::SyncFailureRate { rate, threshold } => {
                format!("sync failure rate {rate:.2} above {threshold:.2}")
            }
            Self::WebhookErrorRate { rate, threshold } => {
                format!("webhook error rate {rate:.2} above {threshold:.2}")
            }
            Self::RateLimitHeadroom { headroom, threshold } => {
                format!("rate-limit headroom {headroom:.2} below {threshold:.2}")
            }
        }
    }
}

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl_domain_status_conversions!(AlertSeverity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

/// Alert kinds; at most one open alert per (integration, kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    BreakerOpen,
    AuthenticationFailure,
    SyncHalted,
    SyncFailureRate,
    ReconciliationFailures,
    WebhookSignature,
    WebhookErrorRate,
    RateLimitHeadroom,
}

impl_domain_status_conversions!(AlertKind {
    BreakerOpen => "breaker_open",
    AuthenticationFailure => "authentication_failure",
    SyncHalted => "sync_halted",
    SyncFailureRate => "sync_failure_rate",
    ReconciliationFailures => "reconciliation_failures",
    WebhookSignature => "webhook_signature",
    WebhookErrorRate => "webhook_error_rate",
    RateLimitHeadroom => "rate_limit_headroom",
});

impl AlertKind {
    pub const ALL: [Self; 8] = [
        Self::BreakerOpen,
        Self::AuthenticationFailure,
        Self::SyncHalted,
        Self::SyncFailureRate,
        Self::ReconciliationFailures,
        Self::WebhookSignature,
        Self::WebhookErrorRate,
        Self::RateLimitHeadroom,
    ];

    pub const fn severity(self) -> AlertSeverity {
        match self {
            Self::SyncHalted => AlertSeverity::Critical,
            Self::BreakerOpen | Self::AuthenticationFailure | Self::WebhookSignature => {
                AlertSeverity::High
            }
            Self::SyncFailureRate | Self::ReconciliationFailures | Self::WebhookErrorRate => {
                AlertSeverity::Medium
            }
            Self::RateLimitHeadroom => AlertSeverity::Low,
        }
    }
}

/// An alert; never deleted, only resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub detail: String,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn open(integration_id: Uuid, kind: AlertKind, detail: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            integration_id,
            kind,
            severity: kind.severity(),
            detail: detail.into(),
            opened_at: now,
            resolved_at: None,
        }
    }

    pub const fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Everything the classifier needs for one integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthInputs {
    pub enabled: bool,
    pub status: IntegrationStatus,
    pub breaker: BreakerState,
    /// Record states created within the lookback window
    pub records: StateCounts,
    pub webhooks: WebhookStats,
    pub rate_limit_headroom: Option<f64>,
    /// Failed records not yet overridden, regardless of age
    pub unresolved_failures: u64,
}

/// Derived, never independently mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub integration_id: Uuid,
    pub business_id: String,
    pub provider: Provider,
    pub status: HealthStatus,
    pub reasons: Vec<HealthReason>,
    pub breaker_state: BreakerState,
    pub integration_status: IntegrationStatus,
    pub enabled: bool,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub last_sync_run: Option<SyncRun>,
    pub pending_count: u64,
    pub failed_count: u64,
    pub sync_failure_rate: f64,
    pub webhooks: WebhookStats,
    pub rate_limit_headroom: Option<f64>,
    pub open_alerts: Vec<Alert>,
    pub overrides_in_lookback: u64,
    pub evaluated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_table() {
        assert_eq!(AlertKind::SyncHalted.severity(), AlertSeverity::Critical);
        assert_eq!(AlertKind::WebhookSignature.severity(), AlertSeverity::High);
        assert_eq!(AlertKind::ReconciliationFailures.severity(), AlertSeverity::Medium);
        assert_eq!(AlertKind::RateLimitHeadroom.severity(), AlertSeverity::Low);
        assert!(AlertSeverity::Critical > AlertSeverity::High);
    }

    #[test]
    fn test_breaker_state_wire_format() {
        assert_eq!(serde_json::to_value(BreakerState::HalfOpen).unwrap(), "HALF_OPEN");
        assert_eq!("HALF_OPEN".parse::<BreakerState>().unwrap(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_reason_offline_split() {
        assert!(HealthReason::Halted.is_offline());
        assert!(!HealthReason::BreakerHalfOpen.is_offline());
        assert!(!HealthReason::RateLimitHeadroom { headroom: 0.05, threshold: 0.1 }.is_offline());
    }
}
