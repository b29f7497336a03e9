//! Scheduler error types

use ledgerlink_domain::LedgerLinkError;
use thiserror::Error;

use crate::errors::InfraError;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// Operation timed out
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

impl From<tokio::task::JoinError> for SchedulerError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoinFailed(err.to_string())
    }
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let ledger_err = match err {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                LedgerLinkError::Validation(err.to_string())
            }
            SchedulerError::Timeout { seconds } => LedgerLinkError::Timeout(seconds.saturating_mul(1_000)),
            SchedulerError::TaskJoinFailed(_) => LedgerLinkError::Internal(err.to_string()),
        };
        InfraError(ledger_err)
    }
}

impl From<SchedulerError> for LedgerLinkError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
