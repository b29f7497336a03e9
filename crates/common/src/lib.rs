//! Modular common utilities shared across LedgerLink crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: plain data types and error enums
//! - `runtime`: async resilience infrastructure (clock, circuit breaker, retry)
//! - `observability`: tracing (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use resilience::{
    retry_with_policy, BackoffStrategy, BreakerSnapshot, CallPermit, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitState, Clock, ConfigError, Jitter,
    MockClock, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError,
    RetryExecutor, RetryOutcome, RetryPolicy, StateTransition, SystemClock,
};
