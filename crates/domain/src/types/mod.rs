//! Domain types and models
//!
//! Grouped by the component that owns them: integrations and cursors,
//! expected and provider transactions, provider payload variants, webhook
//! deliveries, sync runs, health and alerts, and the override log.

pub mod health;
pub mod integration;
pub mod overrides;
pub mod provider;
pub mod sync;
pub mod transaction;
pub mod webhook;

pub use health::{
    Alert, AlertKind, AlertSeverity, BreakerState, HealthInputs, HealthReason, HealthSnapshot,
    HealthStatus,
};
pub use integration::{
    Integration, IntegrationChanges, IntegrationStatus, Provider, RetryPolicy, SyncCursor,
};
pub use overrides::{OverrideAction, OverrideEntry, OverrideFilter, OverrideTarget};
pub use provider::{
    currency_exponent, parse_minor_units, FetchPage, FetchWindow, ProviderWebhook, ShopifyOrder,
    ShopifyWebhook, SquareMoney, SquarePayment, SquareWebhook, ZettlePurchase, ZettleWebhook,
};
pub use sync::{
    SyncCounts, SyncMode, SyncOperationHandle, SyncOutcome, SyncPriority, SyncRequest, SyncRun,
    SyncTrigger,
};
pub use transaction::{
    payload_hash, FailureReason, LedgerOutcome, NewTransactionRecord, ProviderLedgerEntry,
    ProviderTransaction, RecordUpdate, StateCounts, TransactionRecord, VerificationState,
};
pub use webhook::{
    InboundWebhook, RejectReason, WebhookEvent, WebhookOutcome, WebhookReceipt, WebhookStats,
};
