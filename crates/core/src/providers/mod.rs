//! Provider adapter boundary

pub mod ports;

pub use ports::{AdapterFactory, ProviderAdapter};
