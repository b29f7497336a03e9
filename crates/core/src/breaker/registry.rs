//! Per-integration circuit breakers with persisted state

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ledgerlink_common::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use ledgerlink_domain::{BreakerConfig, BreakerState, LedgerLinkError, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ports::BreakerStateRepository;
use crate::SharedClock;

/// Breaker type used throughout the engine
pub type IntegrationBreaker = CircuitBreaker<SharedClock>;

/// Build the common breaker configuration from application config
pub fn breaker_config(config: &BreakerConfig) -> Result<CircuitBreakerConfig> {
    CircuitBreakerConfig::builder()
        .window_size(config.window_size)
        .minimum_calls(config.minimum_calls)
        .failure_rate_threshold(config.failure_rate_threshold)
        .base_cooldown(Duration::from_secs(config.base_cooldown_secs))
        .max_cooldown(Duration::from_secs(config.max_cooldown_secs))
        .build()
        .map_err(|e| LedgerLinkError::Config(e.to_string()))
}

/// Map the common breaker state onto the domain representation
pub const fn to_domain_state(state: CircuitState) -> BreakerState {
    match state {
        CircuitState::Closed => BreakerState::Closed,
        CircuitState::Open => BreakerState::Open,
        CircuitState::HalfOpen => BreakerState::HalfOpen,
    }
}

/// Lazily restores one breaker per integration and persists snapshots
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    repository: Arc<dyn BreakerStateRepository>,
    breakers: DashMap<Uuid, Arc<IntegrationBreaker>>,
}

impl BreakerRegistry {
    pub fn new(
        config: CircuitBreakerConfig,
        clock: SharedClock,
        repository: Arc<dyn BreakerStateRepository>,
    ) -> Self {
        Self { config, clock, repository, breakers: DashMap::new() }
    }

    /// Breaker for `integration_id`, restored from its last snapshot on first
    /// use
    pub async fn breaker(&self, integration_id: Uuid) -> Result<Arc<IntegrationBreaker>> {
        if let Some(existing) = self.breakers.get(&integration_id) {
            return Ok(Arc::clone(existing.value()));
        }

        let restored = match self.repository.load(integration_id).await? {
            Some(snapshot) => {
                debug!(%integration_id, state = %snapshot.state, "restoring circuit breaker");
                CircuitBreaker::restore(self.config.clone(), Arc::clone(&self.clock), &snapshot)
            }
            None => CircuitBreaker::with_clock(self.config.clone(), Arc::clone(&self.clock)),
        }
        .map_err(|e| LedgerLinkError::Config(e.to_string()))?;

        let entry = self.breakers.entry(integration_id).or_insert_with(|| Arc::new(restored));
        Ok(Arc::clone(entry.value()))
    }

    /// Persist the current snapshot of a loaded breaker
    pub async fn persist(&self, integration_id: Uuid) -> Result<()> {
        let snapshot = match self.breakers.get(&integration_id) {
            Some(breaker) => breaker.snapshot(),
            None => return Ok(()),
        };
        self.repository.save(integration_id, &snapshot).await
    }

    /// Persist, logging instead of failing the caller
    pub async fn persist_quietly(&self, integration_id: Uuid) {
        if let Err(err) = self.persist(integration_id).await {
            warn!(%integration_id, error = %err, "failed to persist circuit breaker state");
        }
    }

    /// Current state, restoring the breaker if needed
    pub async fn state(&self, integration_id: Uuid) -> Result<BreakerState> {
        Ok(to_domain_state(self.breaker(integration_id).await?.state()))
    }
}
