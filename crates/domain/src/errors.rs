//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::impl_domain_status_conversions;

/// Main error type for LedgerLink
///
/// Every variant maps onto one [`ErrorKind`], which decides retry, breaker and
/// alerting policy.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum LedgerLinkError {
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Rate limited: {message}")]
    RateLimited { message: String, retry_after_secs: Option<u64> },

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Data inconsistency: {0}")]
    DataInconsistency(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error taxonomy driving retry, breaker and alert decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Authentication,
    Validation,
    DataInconsistency,
    Fatal,
}

impl_domain_status_conversions!(ErrorKind {
    Transient => "transient",
    Authentication => "authentication",
    Validation => "validation",
    DataInconsistency => "data_inconsistency",
    Fatal => "fatal",
});

impl LedgerLinkError {
    /// Taxonomy bucket of this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_)
            | Self::RateLimited { .. }
            | Self::Timeout(_)
            | Self::Database(_)
            | Self::Cancelled(_) => ErrorKind::Transient,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Validation(_) | Self::NotFound(_) => ErrorKind::Validation,
            Self::DataInconsistency(_) => ErrorKind::DataInconsistency,
            Self::Fatal(_) | Self::Config(_) | Self::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the caller may retry the same operation later
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient) && !matches!(self, Self::Cancelled(_))
    }

    /// Whether this failure counts against a provider circuit breaker
    pub const fn feeds_breaker(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. } | Self::Timeout(_))
    }

    /// Stable label used in logs and metrics
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Authentication(_) => "authentication",
            Self::Validation(_) => "validation",
            Self::DataInconsistency(_) => "data_inconsistency",
            Self::Fatal(_) => "fatal",
            Self::NotFound(_) => "not_found",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Cancelled(_) => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<serde_json::Error> for LedgerLinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("invalid JSON: {err}"))
    }
}

/// Result type alias for LedgerLink operations
pub type Result<T> = std::result::Result<T, LedgerLinkError>;
