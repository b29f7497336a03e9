//! Resilience patterns for fault tolerance and error handling
//!
//! This module provides **generic, reusable** resilience patterns:
//! - **Circuit Breaker**: a sliding-window failure-rate breaker whose cooldown
//!   grows exponentially after failed probes
//! - **Retry Logic**: configurable retry strategies with exponential backoff
//!   and jitter
//!
//! Both share the [`BackoffStrategy`] type so that the breaker cooldown and
//! operation retries follow one declared backoff shape. Time is read through
//! the [`Clock`] trait, which lets tests drive transitions with [`MockClock`]
//! instead of sleeping.

pub mod circuit_breaker;
pub mod retry;

// Re-export circuit breaker types
pub use circuit_breaker::{
    BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitState, Clock, ConfigError, ConfigResult, MockClock,
    StateTransition, SystemClock,
};
// Re-export retry types
pub use retry::{
    policies, retry_with_policy, BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder,
    RetryDecision, RetryError, RetryExecutor, RetryOutcome, RetryPolicy, RetryResult,
};
