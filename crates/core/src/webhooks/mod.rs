//! Inbound webhook delivery tracking

pub mod ports;
pub mod tracker;

pub use ports::WebhookEventRepository;
pub use tracker::WebhookTracker;
