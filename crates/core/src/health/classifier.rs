//! Pure health classification
//!
//! No I/O: the aggregator gathers [`HealthInputs`] and this module decides
//! the status, the reasons, and which alert conditions currently hold.

use ledgerlink_domain::{
    AlertKind, BreakerState, HealthConfig, HealthInputs, HealthReason, HealthStatus,
    IntegrationStatus,
};

/// Thresholds applied by [`classify`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub max_sync_failure_rate: f64,
    pub max_webhook_error_rate: f64,
    pub min_rate_limit_headroom: f64,
    pub min_sample_size: u64,
}

impl From<&HealthConfig> for HealthThresholds {
    fn from(config: &HealthConfig) -> Self {
        Self {
            max_sync_failure_rate: config.max_sync_failure_rate,
            max_webhook_error_rate: config.max_webhook_error_rate,
            min_rate_limit_headroom: config.min_rate_limit_headroom,
            min_sample_size: config.min_sample_size,
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

/// Classify one integration
///
/// Offline conditions dominate; any degrading condition otherwise yields
/// `Degraded`. Reasons list every condition that holds.
pub fn classify(inputs: &HealthInputs, thresholds: &HealthThresholds) -> (HealthStatus, Vec<HealthReason>) {
    let mut reasons = Vec::new();

    if !inputs.enabled {
        reasons.push(HealthReason::Disabled);
    }
    match inputs.status {
        IntegrationStatus::Active => {}
        IntegrationStatus::NeedsReauth => reasons.push(HealthReason::NeedsReauth),
        IntegrationStatus::Halted => reasons.push(HealthReason::Halted),
    }
    match inputs.breaker {
        BreakerState::Closed => {}
        BreakerState::Open => reasons.push(HealthReason::BreakerOpen),
        BreakerState::HalfOpen => reasons.push(HealthReason::BreakerHalfOpen),
    }

    if let Some(rate) = sync_failure_rate_breach(inputs, thresholds) {
        reasons.push(HealthReason::SyncFailureRate {
            rate,
            threshold: thresholds.max_sync_failure_rate,
        });
    }
    if let Some(rate) = webhook_error_rate_breach(inputs, thresholds) {
        reasons.push(HealthReason::WebhookErrorRate {
            rate,
            threshold: thresholds.max_webhook_error_rate,
        });
    }
    if let Some(headroom) = headroom_breach(inputs, thresholds) {
        reasons.push(HealthReason::RateLimitHeadroom {
            headroom,
            threshold: thresholds.min_rate_limit_headroom,
        });
    }

    let status = if reasons.iter().any(HealthReason::is_offline) {
        HealthStatus::Offline
    } else if reasons.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    (status, reasons)
}

/// Alert conditions currently holding, with a human-readable detail each
///
/// Disabled integrations are never alerted on.
pub fn active_alert_conditions(
    inputs: &HealthInputs,
    thresholds: &HealthThresholds,
) -> Vec<(AlertKind, String)> {
    if !inputs.enabled {
        return Vec::new();
    }

    let mut active = Vec::new();
    if inputs.breaker == BreakerState::Open {
        active.push((AlertKind::BreakerOpen, "circuit breaker is open".to_string()));
    }
    if inputs.status == IntegrationStatus::NeedsReauth {
        active.push((
            AlertKind::AuthenticationFailure,
            "provider rejected credentials; reconfiguration required".to_string(),
        ));
    }
    if inputs.status == IntegrationStatus::Halted {
        active.push((AlertKind::SyncHalted, "sync halted after an invariant violation".to_string()));
    }
    if let Some(rate) = sync_failure_rate_breach(inputs, thresholds) {
        active.push((
            AlertKind::SyncFailureRate,
            format!("sync failure rate {rate:.2} above {:.2}", thresholds.max_sync_failure_rate),
        ));
    }
    if inputs.unresolved_failures > 0 {
        active.push((
            AlertKind::ReconciliationFailures,
            format!("{} failed transaction(s) await review", inputs.unresolved_failures),
        ));
    }
    if inputs.webhooks.signature_failures > 0 {
        active.push((
            AlertKind::WebhookSignature,
            format!(
                "{} webhook(s) failed signature verification",
                inputs.webhooks.signature_failures
            ),
        ));
    }
    if let Some(rate) = webhook_error_rate_breach(inputs, thresholds) {
        active.push((
            AlertKind::WebhookErrorRate,
            format!("webhook error rate {rate:.2} above {:.2}", thresholds.max_webhook_error_rate),
        ));
    }
    if let Some(headroom) = headroom_breach(inputs, thresholds) {
        active.push((
            AlertKind::RateLimitHeadroom,
            format!(
                "rate-limit headroom {headroom:.2} below {:.2}",
                thresholds.min_rate_limit_headroom
            ),
        ));
    }
    active
}

fn sync_failure_rate_breach(inputs: &HealthInputs, thresholds: &HealthThresholds) -> Option<f64> {
    if inputs.records.classified() < thresholds.min_sample_size {
        return None;
    }
    let rate = inputs.records.failure_rate();
    (rate > thresholds.max_sync_failure_rate).then_some(rate)
}

fn webhook_error_rate_breach(inputs: &HealthInputs, thresholds: &HealthThresholds) -> Option<f64> {
    if inputs.webhooks.total < thresholds.min_sample_size {
        return None;
    }
    let rate = inputs.webhooks.error_rate();
    (rate > thresholds.max_webhook_error_rate).then_some(rate)
}

fn headroom_breach(inputs: &HealthInputs, thresholds: &HealthThresholds) -> Option<f64> {
    inputs.rate_limit_headroom.filter(|headroom| *headroom < thresholds.min_rate_limit_headroom)
}
