//! Health classification, aggregation and alert lifecycle

pub mod aggregator;
pub mod alerts;
pub mod classifier;
pub mod ports;

pub use aggregator::{HealthAggregator, HealthPorts};
pub use alerts::{AlertChanges, AlertManager};
pub use classifier::{active_alert_conditions, classify, HealthThresholds};
