//! Sliding-window circuit breaker
//!
//! The breaker tracks the outcome of the last `window_size` calls. Once at
//! least `minimum_calls` outcomes are recorded and the failure ratio reaches
//! `failure_rate_threshold`, it opens. An open breaker rejects calls until its
//! cooldown elapses, then admits exactly one probe (half-open). A successful
//! probe closes the breaker and resets the window; a failed probe reopens it
//! with the cooldown doubled, up to `max_cooldown`.
//!
//! State can be exported with [`CircuitBreaker::snapshot`] and rebuilt with
//! [`CircuitBreaker::restore`] so that callers can persist it.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::retry::BackoffStrategy;

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Trait for reading wall-clock time
///
/// Production code uses [`SystemClock`]; tests use [`MockClock`] to move time
/// forward without sleeping.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same underlying time, so a clone handed to a component can
/// be advanced from the test body.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a mock clock pinned to 2024-01-01T00:00:00Z
    pub fn new() -> Self {
        Self::at(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }

    /// Create a mock clock starting at `start`
    pub fn at(start: DateTime<Utc>) -> Self {
        Self { current: Arc::new(Mutex::new(start)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        let delta = to_time_delta(duration);
        let mut current = self.current.lock();
        *current = current.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Advance the mock clock by whole seconds
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

fn to_time_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

//==============================================================================
// Error Types
//==============================================================================

/// Simple configuration error for validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

//==============================================================================
// State
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit admits a single probe to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Stable string form used for persistence and labels
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLOSED" => Ok(Self::Closed),
            "OPEN" => Ok(Self::Open),
            "HALF_OPEN" => Ok(Self::HalfOpen),
            other => Err(ConfigError::Invalid { message: format!("unknown circuit state: {other}") }),
        }
    }
}

/// Whether a caller may perform a call right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermit {
    /// Breaker is closed
    Allowed,
    /// Breaker is half-open and this caller holds the single probe slot
    Probe,
    /// Call must not be attempted
    Rejected { retry_at: DateTime<Utc> },
}

impl CallPermit {
    /// `true` for [`CallPermit::Allowed`] and [`CallPermit::Probe`]
    pub const fn is_permitted(&self) -> bool {
        matches!(self, Self::Allowed | Self::Probe)
    }
}

/// A state change performed by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Serializable view of the breaker, suitable for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    /// Outcomes in the sliding window, oldest first (`true` = success)
    pub recent_outcomes: Vec<bool>,
    pub failure_count: u32,
    pub success_count: u32,
    /// Number of consecutive failed probes; selects the cooldown
    pub cooldown_level: u32,
    pub cooldown_ms: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_transition_at: DateTime<Utc>,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

impl BreakerSnapshot {
    /// Failure ratio over the sliding window (0.0 when empty)
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let total = self.failure_count + self.success_count;
        if total == 0 {
            0.0
        } else {
            f64::from(self.failure_count) / f64::from(total)
        }
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of most recent call outcomes considered
    pub window_size: usize,
    /// Outcomes required in the window before the ratio is evaluated
    pub minimum_calls: usize,
    /// Failure ratio (0.0, 1.0] at or above which the breaker opens
    pub failure_rate_threshold: f64,
    /// Cooldown after the first opening
    pub base_cooldown: Duration,
    /// Ceiling for the doubled cooldown
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            minimum_calls: 10,
            failure_rate_threshold: 0.5,
            base_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(15 * 60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Backoff shape of the cooldown
    pub fn cooldown_backoff(&self) -> BackoffStrategy {
        BackoffStrategy::doubling(self.base_cooldown, self.max_cooldown)
    }

    /// Cooldown applied after `level` consecutive failed probes
    pub fn cooldown_for_level(&self, level: u32) -> Duration {
        self.cooldown_backoff().calculate_delay(level)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.window_size == 0 {
            return Err(invalid("window_size must be greater than 0"));
        }
        if self.minimum_calls == 0 || self.minimum_calls > self.window_size {
            return Err(invalid("minimum_calls must be between 1 and window_size"));
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(invalid("failure_rate_threshold must be in (0, 1]"));
        }
        if self.base_cooldown.is_zero() {
            return Err(invalid("base_cooldown must be greater than 0"));
        }
        if self.max_cooldown < self.base_cooldown {
            return Err(invalid("max_cooldown must not be shorter than base_cooldown"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid { message: message.to_string() }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn window_size(mut self, size: usize) -> Self {
        self.config.window_size = size;
        self
    }

    pub fn minimum_calls(mut self, calls: usize) -> Self {
        self.config.minimum_calls = calls;
        self
    }

    pub fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.config.failure_rate_threshold = threshold;
        self
    }

    pub fn base_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.base_cooldown = cooldown;
        self
    }

    pub fn max_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.max_cooldown = cooldown;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//==============================================================================
// Breaker
//==============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: VecDeque<bool>,
    cooldown_level: u32,
    opened_at: Option<DateTime<Utc>>,
    last_transition_at: DateTime<Utc>,
    probe_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
}

impl BreakerInner {
    fn failures(&self) -> usize {
        self.window.iter().filter(|ok| !**ok).count()
    }

    fn push(&mut self, success: bool, capacity: usize) {
        self.window.push_back(success);
        while self.window.len() > capacity {
            self.window.pop_front();
        }
    }

    fn transition(&mut self, to: CircuitState, at: DateTime<Utc>) -> StateTransition {
        let from = self.state;
        self.state = to;
        self.last_transition_at = at;
        StateTransition { from, to, at }
    }
}

/// Sliding-window circuit breaker
///
/// All state lives behind one mutex, so every decision is atomic with respect
/// to the transition it may cause.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    clock: C,
    inner: Mutex<BreakerInner>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("window", &inner.window.len())
            .field("cooldown_level", &inner.cooldown_level)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a closed circuit breaker with a custom clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                cooldown_level: 0,
                opened_at: None,
                last_transition_at: now,
                probe_in_flight: false,
                total_calls: 0,
                rejected_calls: 0,
            }),
        })
    }

    /// Rebuild a breaker from a persisted snapshot
    ///
    /// A snapshot taken while a probe was in flight restores as half-open with
    /// the probe slot free.
    pub fn restore(
        config: CircuitBreakerConfig,
        clock: C,
        snapshot: &BreakerSnapshot,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let skip = snapshot.recent_outcomes.len().saturating_sub(config.window_size);
        let window = snapshot.recent_outcomes.iter().skip(skip).copied().collect();
        let opened_at = match snapshot.state {
            CircuitState::Closed => None,
            _ => Some(snapshot.opened_at.unwrap_or(snapshot.last_transition_at)),
        };
        Ok(Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: snapshot.state,
                window,
                cooldown_level: snapshot.cooldown_level,
                opened_at,
                last_transition_at: snapshot.last_transition_at,
                probe_in_flight: false,
                total_calls: snapshot.total_calls,
                rejected_calls: snapshot.rejected_calls,
            }),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for permission to perform one call
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and hands
    /// the single probe slot to this caller.
    pub fn try_acquire(&self) -> CallPermit {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.total_calls += 1;
                CallPermit::Allowed
            }
            CircuitState::Open => {
                let retry_at = self.retry_at(&inner);
                if now >= retry_at {
                    let transition = inner.transition(CircuitState::HalfOpen, now);
                    inner.probe_in_flight = true;
                    inner.total_calls += 1;
                    info!(from = %transition.from, to = %transition.to, "circuit breaker admitting probe");
                    CallPermit::Probe
                } else {
                    inner.rejected_calls += 1;
                    debug!(retry_at = %retry_at, "circuit breaker rejecting call");
                    CallPermit::Rejected { retry_at }
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.rejected_calls += 1;
                    CallPermit::Rejected { retry_at: now }
                } else {
                    inner.probe_in_flight = true;
                    inner.total_calls += 1;
                    CallPermit::Probe
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) -> Option<StateTransition> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.push(true, self.config.window_size);
                None
            }
            CircuitState::HalfOpen => {
                inner.window.clear();
                inner.cooldown_level = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                let transition = inner.transition(CircuitState::Closed, now);
                info!("circuit breaker closed after successful probe");
                Some(transition)
            }
            CircuitState::Open => {
                debug!("ignoring late success while circuit is open");
                None
            }
        }
    }

    /// Record a failed call
    #[allow(clippy::cast_precision_loss)]
    pub fn record_failure(&self) -> Option<StateTransition> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.push(false, self.config.window_size);
                let calls = inner.window.len();
                if calls < self.config.minimum_calls {
                    return None;
                }
                let rate = inner.failures() as f64 / calls as f64;
                if rate >= self.config.failure_rate_threshold {
                    inner.opened_at = Some(now);
                    let transition = inner.transition(CircuitState::Open, now);
                    warn!(
                        failure_rate = rate,
                        calls,
                        cooldown_ms = self.cooldown_millis(inner.cooldown_level),
                        "circuit breaker opened"
                    );
                    Some(transition)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                inner.cooldown_level = inner.cooldown_level.saturating_add(1);
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                let transition = inner.transition(CircuitState::Open, now);
                warn!(
                    cooldown_level = inner.cooldown_level,
                    cooldown_ms = self.cooldown_millis(inner.cooldown_level),
                    "circuit breaker reopened after failed probe"
                );
                Some(transition)
            }
            CircuitState::Open => None,
        }
    }

    /// Give back a probe slot without recording an outcome
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Cooldown that applies to the current (or next) opening
    pub fn current_cooldown(&self) -> Duration {
        self.config.cooldown_for_level(self.inner.lock().cooldown_level)
    }

    /// Export the breaker state
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let failures = inner.failures();
        let successes = inner.window.len() - failures;
        BreakerSnapshot {
            state: inner.state,
            recent_outcomes: inner.window.iter().copied().collect(),
            failure_count: u32::try_from(failures).unwrap_or(u32::MAX),
            success_count: u32::try_from(successes).unwrap_or(u32::MAX),
            cooldown_level: inner.cooldown_level,
            cooldown_ms: self.cooldown_millis(inner.cooldown_level),
            opened_at: inner.opened_at,
            last_transition_at: inner.last_transition_at,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
        }
    }

    fn retry_at(&self, inner: &BreakerInner) -> DateTime<Utc> {
        let cooldown = to_time_delta(self.config.cooldown_for_level(inner.cooldown_level));
        inner
            .opened_at
            .unwrap_or(inner.last_transition_at)
            .checked_add_signed(cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn cooldown_millis(&self, level: u32) -> u64 {
        u64::try_from(self.config.cooldown_for_level(level).as_millis()).unwrap_or(u64::MAX)
    }
}
