use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use ledgerlink_domain::{
    Alert, HealthSnapshot, InboundWebhook, Integration, NewTransactionRecord, OverrideEntry,
    Provider, RejectReason, SyncOperationHandle, TransactionRecord, WebhookOutcome, WebhookReceipt,
};
use ledgerlink_infra::{delivery_id_header, signature_header};
use serde::Serialize;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use crate::commands::{
    self, AlertsQuery, ForceSyncRequest, OverrideTransactionRequest, OverridesQuery,
    ReconfigureIntegrationRequest,
};
use crate::context::AppContext;

type Ctx = State<Arc<AppContext>>;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Serialize)]
pub struct Liveness {
    status: &'static str,
    database: bool,
    scheduler_running: bool,
}

pub async fn livez(State(ctx): Ctx) -> (StatusCode, Json<Liveness>) {
    let database = ctx.db.health_check().is_ok();
    let body = Liveness {
        status: if database { "ok" } else { "degraded" },
        database,
        scheduler_running: ctx.scheduler_running().await,
    };
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

pub async fn metrics(State(ctx): Ctx) -> ApiResult<impl IntoResponse> {
    let rendered = ctx.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], rendered))
}

pub async fn receive_webhook(
    State(ctx): Ctx,
    Path((provider, integration_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WebhookReceipt>)> {
    let provider = Provider::from_str(&provider).map_err(|_| ApiError::UnknownProvider(provider))?;
    let delivery = InboundWebhook {
        provider,
        integration_id,
        raw_payload: body.to_vec(),
        signature: header_value(&headers, signature_header(provider)),
        delivery_id: delivery_id_header(provider).and_then(|name| header_value(&headers, name)),
    };

    let receipt = commands::receive_webhook(&ctx, delivery).await?;
    Ok((webhook_status(&receipt), Json(receipt)))
}

pub async fn replay_webhook(
    State(ctx): Ctx,
    Path(record_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<WebhookReceipt>)> {
    let receipt = commands::replay_webhook(&ctx, record_id).await?;
    Ok((webhook_status(&receipt), Json(receipt)))
}

pub async fn all_integration_health(State(ctx): Ctx) -> ApiResult<Json<Vec<HealthSnapshot>>> {
    Ok(Json(commands::all_integration_health(&ctx).await?))
}

pub async fn integration_health(
    State(ctx): Ctx,
    Path(integration_id): Path<Uuid>,
) -> ApiResult<Json<HealthSnapshot>> {
    Ok(Json(commands::integration_health(&ctx, integration_id).await?))
}

pub async fn force_sync(
    State(ctx): Ctx,
    Path(integration_id): Path<Uuid>,
    payload: Result<Json<ForceSyncRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SyncOperationHandle>)> {
    let Json(request) = payload?;
    let handle = commands::force_sync(&ctx, integration_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

pub async fn reconfigure_integration(
    State(ctx): Ctx,
    Path(integration_id): Path<Uuid>,
    payload: Result<Json<ReconfigureIntegrationRequest>, JsonRejection>,
) -> ApiResult<Json<Integration>> {
    let Json(request) = payload?;
    Ok(Json(commands::reconfigure_integration(&ctx, integration_id, request).await?))
}

pub async fn register_transaction(
    State(ctx): Ctx,
    payload: Result<Json<NewTransactionRecord>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TransactionRecord>)> {
    let Json(request) = payload?;
    let record = commands::register_transaction(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn override_transaction(
    State(ctx): Ctx,
    Path(transaction_id): Path<Uuid>,
    payload: Result<Json<OverrideTransactionRequest>, JsonRejection>,
) -> ApiResult<Json<TransactionRecord>> {
    let Json(request) = payload?;
    Ok(Json(commands::override_transaction(&ctx, transaction_id, request).await?))
}

pub async fn list_overrides(
    State(ctx): Ctx,
    query: Result<Query<OverridesQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<OverrideEntry>>> {
    let Query(query) = query?;
    Ok(Json(commands::list_overrides(&ctx, query).await?))
}

pub async fn list_alerts(
    State(ctx): Ctx,
    query: Result<Query<AlertsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Alert>>> {
    let Query(query) = query?;
    Ok(Json(commands::list_alerts(&ctx, query).await?))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// Delivery outcome to HTTP status; providers retry anything but 2xx
const fn webhook_status(receipt: &WebhookReceipt) -> StatusCode {
    match (receipt.outcome, receipt.reject_reason) {
        (WebhookOutcome::Accepted | WebhookOutcome::Duplicate, _) => StatusCode::OK,
        (WebhookOutcome::Rejected, Some(RejectReason::InvalidSignature)) => StatusCode::UNAUTHORIZED,
        (WebhookOutcome::Rejected, _) => StatusCode::BAD_REQUEST,
        (WebhookOutcome::Errored, _) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
