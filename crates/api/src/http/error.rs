//! Errors crossing the HTTP boundary

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ledgerlink_domain::LedgerLinkError;
use ledgerlink_infra::MetricsError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Error type for HTTP handlers
///
/// Rendered as `{ "type", "message", "retryable" }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] LedgerLinkError),

    #[error("invalid request body: {0}")]
    Body(#[from] JsonRejection),

    #[error("invalid query: {0}")]
    Query(#[from] QueryRejection),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl From<MetricsError> for ApiError {
    fn from(err: MetricsError) -> Self {
        Self::Domain(err.into())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: &'static str,
    message: String,
    retryable: bool,
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Domain(err) => domain_status(err),
            Self::Body(_) | Self::Query(_) => StatusCode::BAD_REQUEST,
            Self::UnknownProvider(_) => StatusCode::NOT_FOUND,
        }
    }

    const fn error_type(&self) -> &'static str {
        match self {
            Self::Domain(err) => err.label(),
            Self::Body(_) | Self::Query(_) => "bad_request",
            Self::UnknownProvider(_) => "not_found",
        }
    }

    const fn retryable(&self) -> bool {
        match self {
            Self::Domain(err) => err.is_retryable(),
            _ => false,
        }
    }
}

const fn domain_status(err: &LedgerLinkError) -> StatusCode {
    match err {
        LedgerLinkError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerLinkError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerLinkError::Authentication(_) => StatusCode::UNAUTHORIZED,
        LedgerLinkError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        LedgerLinkError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        LedgerLinkError::Transient(_) | LedgerLinkError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerLinkError::DataInconsistency(_) | LedgerLinkError::Cancelled(_) => StatusCode::CONFLICT,
        LedgerLinkError::Fatal(_) | LedgerLinkError::Config(_) | LedgerLinkError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error_type: self.error_type(),
            message: self.to_string(),
            retryable: self.retryable(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
