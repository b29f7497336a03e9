//! Scheduling infrastructure for background work
//!
//! The sync scheduler starts due incremental syncs and re-evaluates
//! integration health on fixed intervals. It follows the runtime rules used
//! throughout the crate:
//! - Explicit lifecycle management (start/stop)
//! - Join handles for spawned tasks
//! - Cancellation token support
//! - Timeout wrapping on shutdown

pub mod error;
pub mod sync_scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use sync_scheduler::{SyncScheduler, SyncSchedulerConfig};
