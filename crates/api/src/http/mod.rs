//! axum HTTP surface

mod error;
mod handlers;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;

pub use error::{ApiError, ApiResult};

use crate::context::AppContext;

/// Every route LedgerLink serves
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/metrics", get(handlers::metrics))
        .route("/webhooks/events/{record_id}/replay", post(handlers::replay_webhook))
        .route("/webhooks/{provider}/{integration_id}", post(handlers::receive_webhook))
        .route("/health/integrations", get(handlers::all_integration_health))
        .route("/health/integrations/{integration_id}", get(handlers::integration_health))
        .route("/integrations/{integration_id}", patch(handlers::reconfigure_integration))
        .route("/integrations/{integration_id}/sync", post(handlers::force_sync))
        .route("/transactions", post(handlers::register_transaction))
        .route("/transactions/{transaction_id}/override", post(handlers::override_transaction))
        .route("/overrides", get(handlers::list_overrides))
        .route("/alerts", get(handlers::list_alerts))
        .with_state(ctx)
}
