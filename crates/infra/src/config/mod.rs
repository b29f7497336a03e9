//! Configuration loading and management
//!
//! This module provides utilities for loading application configuration
//! from files and `LEDGERLINK_*` environment variables.

pub mod loader;
mod seed;

// Re-export commonly used items
pub use loader::{apply_env_overrides, load, load_from_env, load_from_file, probe_config_paths};
pub use seed::seed_integrations;
