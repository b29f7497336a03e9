//! Observability infrastructure
//!
//! Reconciliation metrics are exported in the Prometheus text format from a
//! registry owned by [`PrometheusMetrics`]. Nothing is registered with the
//! process-global default registry, so several instances (one per test, for
//! example) can coexist.
//!
//! Recording never fails: the port methods are infallible and label values
//! come from closed enums, so only construction and rendering return
//! [`MetricsResult`].

mod prometheus_metrics;

pub use prometheus_metrics::PrometheusMetrics;

/// Metrics error type
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// A collector could not be created or registered
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),

    /// Encoded output was not valid UTF-8
    #[error("metrics encoding produced invalid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;

impl From<MetricsError> for ledgerlink_domain::LedgerLinkError {
    fn from(err: MetricsError) -> Self {
        Self::Internal(err.to_string())
    }
}
