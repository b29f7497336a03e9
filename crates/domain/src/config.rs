//! Configuration management
//!
//! Every section has defaults, so an empty file (or no file) yields a working
//! configuration. The loader in `ledgerlink-infra` layers files and
//! `LEDGERLINK_*` environment overrides on top.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Provider, RetryPolicy};
use crate::{LedgerLinkError, Result};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub reconciliation: ReconciliationConfig,
    pub breaker: BreakerConfig,
    pub health: HealthConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    /// Integrations inserted on startup when absent
    pub integrations: Vec<IntegrationSeed>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(LedgerLinkError::Config("database.pool_size must be positive".into()));
        }
        self.reconciliation.validate()?;
        self.breaker.validate()?;
        self.health.validate()?;
        if self.scheduler.tick_interval_secs == 0 {
            return Err(LedgerLinkError::Config(
                "scheduler.tick_interval_secs must be positive".into(),
            ));
        }
        for seed in &self.integrations {
            if seed.business_id.trim().is_empty() || seed.credential_ref.trim().is_empty() {
                return Err(LedgerLinkError::Config(
                    "integration seeds need business_id and credential_ref".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "ledgerlink.db".to_string(), pool_size: 8, busy_timeout_ms: 5_000 }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Externally visible base URL; Square signs the notification URL
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

/// Matching and retry tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Largest amount difference (minor units) still considered a match
    pub amount_tolerance_minor: i64,
    /// Largest |record.created_at - provider.occurred_at| for a candidate
    pub match_window_secs: u64,
    /// Age after which a pending record enters retry
    pub staleness_threshold_secs: u64,
    pub provider_timeout_ms: u64,
    pub batch_limit: u32,
    pub default_retry_policy: RetryPolicy,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            amount_tolerance_minor: 1,
            match_window_secs: 600,
            staleness_threshold_secs: 1_800,
            provider_timeout_ms: 10_000,
            batch_limit: 100,
            default_retry_policy: RetryPolicy::default(),
        }
    }
}

impl ReconciliationConfig {
    pub fn match_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.match_window_secs).unwrap_or(i64::MAX / 1_000))
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.staleness_threshold_secs).unwrap_or(i64::MAX / 1_000),
        )
    }

    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.amount_tolerance_minor < 0 {
            return Err(LedgerLinkError::Config(
                "reconciliation.amount_tolerance_minor must not be negative".into(),
            ));
        }
        if self.provider_timeout_ms == 0 || self.batch_limit == 0 {
            return Err(LedgerLinkError::Config(
                "reconciliation.provider_timeout_ms and batch_limit must be positive".into(),
            ));
        }
        self.default_retry_policy
            .validate()
            .map_err(|e| LedgerLinkError::Config(format!("reconciliation.default_retry_policy: {e}")))
    }
}

/// Circuit breaker tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub window_size: usize,
    pub minimum_calls: usize,
    pub failure_rate_threshold: f64,
    pub base_cooldown_secs: u64,
    pub max_cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            minimum_calls: 10,
            failure_rate_threshold: 0.5,
            base_cooldown_secs: 30,
            max_cooldown_secs: 900,
        }
    }
}

impl BreakerConfig {
    fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.minimum_calls == 0 || self.minimum_calls > self.window_size
        {
            return Err(LedgerLinkError::Config(
                "breaker.minimum_calls must be between 1 and window_size".into(),
            ));
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(LedgerLinkError::Config(
                "breaker.failure_rate_threshold must be in (0, 1]".into(),
            ));
        }
        if self.base_cooldown_secs == 0 || self.max_cooldown_secs < self.base_cooldown_secs {
            return Err(LedgerLinkError::Config(
                "breaker cooldowns must satisfy 0 < base <= max".into(),
            ));
        }
        Ok(())
    }
}

/// Health classification thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub lookback_secs: u64,
    pub max_sync_failure_rate: f64,
    pub max_webhook_error_rate: f64,
    pub min_rate_limit_headroom: f64,
    /// Samples required before a rate can degrade health
    pub min_sample_size: u64,
    pub evaluation_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            lookback_secs: 3_600,
            max_sync_failure_rate: 0.2,
            max_webhook_error_rate: 0.1,
            min_rate_limit_headroom: 0.1,
            min_sample_size: 5,
            evaluation_interval_secs: 60,
        }
    }
}

impl HealthConfig {
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.lookback_secs).unwrap_or(i64::MAX / 1_000))
    }

    fn validate(&self) -> Result<()> {
        let rates = [
            self.max_sync_failure_rate,
            self.max_webhook_error_rate,
            self.min_rate_limit_headroom,
        ];
        if rates.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(LedgerLinkError::Config("health thresholds must be within [0, 1]".into()));
        }
        if self.lookback_secs == 0 {
            return Err(LedgerLinkError::Config("health.lookback_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Background scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval_secs: u64,
    pub join_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { enabled: true, tick_interval_secs: 5, join_timeout_secs: 5 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

/// Integration bootstrapped from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSeed {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub business_id: String,
    pub provider: Provider,
    pub credential_ref: String,
    #[serde(default)]
    pub sync_interval_secs: Option<u64>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.reconciliation.match_window(), chrono::Duration::minutes(10));
        assert_eq!(config.reconciliation.staleness_threshold(), chrono::Duration::minutes(30));
        assert_eq!(config.breaker.window_size, 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [reconciliation]
            match_window_secs = 120

            [[integrations]]
            business_id = "biz-1"
            provider = "shopify"
            credential_ref = "env:SHOPIFY_BIZ1"
            "#,
        )
        .unwrap();
        assert_eq!(config.reconciliation.match_window_secs, 120);
        assert_eq!(config.reconciliation.staleness_threshold_secs, 1_800);
        assert_eq!(config.integrations[0].provider, Provider::Shopify);
        assert!(config.integrations[0].enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_breaker_rejected() {
        let mut config = Config::default();
        config.breaker.minimum_calls = 50;
        assert!(config.validate().is_err());
    }
}
