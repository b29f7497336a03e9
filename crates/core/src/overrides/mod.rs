//! Override/audit log and the commands that write to it

pub mod ports;
pub mod service;

pub use ports::OverrideLogRepository;
pub use service::{OverrideService, OverrideTransaction, ReconfigureIntegration};
