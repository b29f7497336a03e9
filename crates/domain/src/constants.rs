//! Application constants
//!
//! Centralized location for domain-level constants used throughout the
//! application.

// Integration defaults
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

// Query limits
pub const DEFAULT_QUERY_LIMIT: u32 = 50;
pub const MAX_QUERY_LIMIT: u32 = 500;

// Override validation
pub const MAX_OVERRIDE_REASON_LENGTH: usize = 1_000;
pub const MAX_ACTOR_LENGTH: usize = 200;

// Webhooks
/// Prefix of the synthetic event id stored for deliveries whose signature
/// failed; the suffix is a payload hash prefix
pub const UNVERIFIED_EVENT_PREFIX: &str = "unverified-";
/// Same, for verified deliveries that could not be decoded
pub const MALFORMED_EVENT_PREFIX: &str = "malformed-";
pub const SYNTHETIC_EVENT_HASH_CHARS: usize = 16;

// Environment
pub const ENV_PREFIX: &str = "LEDGERLINK_";
