//! Circuit breaker registry

pub mod ports;
pub mod registry;

pub use ports::BreakerStateRepository;
pub use registry::{breaker_config, to_domain_state, BreakerRegistry, IntegrationBreaker};
