//! Commands - the operations the HTTP surface exposes
//!
//! Each command takes the [`AppContext`](crate::AppContext), returns a typed
//! domain `Result` and runs through
//! [`execute_command`](crate::utils::command_helpers::execute_command).

pub mod alerts;
pub mod health;
pub mod overrides;
pub mod sync;
pub mod transactions;
pub mod webhooks;

pub use alerts::{list_alerts, AlertsQuery};
pub use health::{all_integration_health, integration_health};
pub use overrides::{
    list_overrides, override_transaction, reconfigure_integration, OverridesQuery,
    OverrideTransactionRequest, ReconfigureIntegrationRequest,
};
pub use sync::{force_sync, ForceSyncRequest};
pub use transactions::register_transaction;
pub use webhooks::{receive_webhook, replay_webhook};
