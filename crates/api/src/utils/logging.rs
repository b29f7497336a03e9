use std::time::Duration;

use ledgerlink_domain::{LedgerLinkError, LoggingConfig};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `logging.level`. Calling this twice is
/// harmless; the second subscriber is discarded.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Log the outcome of a command execution with structured fields.
///
/// # Parameters
/// * `command` - Logical command identifier (e.g. `"overrides::override_transaction"`).
/// * `elapsed` - Duration the command execution took.
/// * `result` - `Err` carries the failure whose label is logged.
///
/// Callers must avoid forwarding sensitive values in `command`.
#[inline]
pub fn log_command_execution(command: &str, elapsed: Duration, result: Result<(), &LedgerLinkError>) {
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(()) => info!(command, duration_ms, "command_execution_success"),
        Err(error) => warn!(
            command,
            duration_ms,
            error_type = error_label(error),
            retryable = error.is_retryable(),
            error = %error,
            "command_execution_failure"
        ),
    }
}

/// Convert a `LedgerLinkError` into a stable label suitable for metrics/logging.
#[inline]
pub const fn error_label(error: &LedgerLinkError) -> &'static str {
    error.label()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_labels_are_stable() {
        assert_eq!(error_label(&LedgerLinkError::validation("bad")), "validation");
        assert_eq!(error_label(&LedgerLinkError::Timeout(5_000)), "timeout");
        assert_eq!(
            error_label(&LedgerLinkError::RateLimited { message: "slow".into(), retry_after_secs: Some(3) }),
            "rate_limited"
        );
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = LoggingConfig { level: "debug".to_string(), json: true };
        init_tracing(&config);
        init_tracing(&config);
        log_command_execution("tests::noop", Duration::from_millis(3), Ok(()));
    }
}
