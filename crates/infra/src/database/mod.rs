//! Database layer
//!
//! One `Sqlite*Repository` per core port, all sharing a [`DbManager`] pool.
//! Blocking SQLite calls run on the tokio blocking pool.

mod codec;
pub mod manager;

pub mod alert_repository;
pub mod breaker_state_repository;
pub mod integration_repository;
pub mod ledger_repository;
pub mod override_log_repository;
pub mod sync_run_repository;
pub mod transaction_repository;
pub mod webhook_event_repository;

pub use alert_repository::SqliteAlertRepository;
pub use breaker_state_repository::SqliteBreakerStateRepository;
pub use integration_repository::SqliteIntegrationRepository;
pub use ledger_repository::SqliteLedgerRepository;
pub use manager::{DbConnection, DbManager};
pub use override_log_repository::SqliteOverrideLogRepository;
pub use sync_run_repository::SqliteSyncRunRepository;
pub use transaction_repository::SqliteTransactionRepository;
pub use webhook_event_repository::SqliteWebhookEventRepository;
