//! Test doubles for the core ports
//!
//! Compiled for unit tests and behind the `test-utils` feature so the infra
//! and api crates can drive the engine without a database or provider.

mod fake_adapter;
mod memory;
mod metrics;

pub use fake_adapter::{FakeProviderAdapter, StaticAdapterFactory};
pub use memory::InMemoryStore;
pub use metrics::RecordingMetrics;
