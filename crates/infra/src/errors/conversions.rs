//! Conversions from external infrastructure errors into domain errors.

use ledgerlink_domain::LedgerLinkError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;
use tokio::task::JoinError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub LedgerLinkError);

impl From<InfraError> for LedgerLinkError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<LedgerLinkError> for InfraError {
    fn from(value: LedgerLinkError) -> Self {
        Self(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoLedgerLinkError {
    fn into_ledgerlink(self) -> LedgerLinkError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → LedgerLinkError */
/* -------------------------------------------------------------------------- */

impl IntoLedgerLinkError for SqlError {
    fn into_ledgerlink(self) -> LedgerLinkError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        LedgerLinkError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        LedgerLinkError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067 | 1555) => {
                        LedgerLinkError::Validation(format!("unique constraint violation: {message}"))
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        LedgerLinkError::Validation("foreign key constraint violation".into())
                    }
                    _ => LedgerLinkError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => LedgerLinkError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                LedgerLinkError::Internal(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                LedgerLinkError::Internal(format!("invalid column type: {ty}"))
            }
            RE::Utf8Error(_) => LedgerLinkError::Internal("invalid UTF-8 returned from sqlite".into()),
            RE::InvalidParameterName(parameter_name) => {
                LedgerLinkError::Internal(format!("invalid parameter name: {parameter_name}"))
            }
            RE::InvalidPath(path) => LedgerLinkError::Config(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            RE::InvalidQuery => LedgerLinkError::Internal("invalid SQL query".into()),
            other => LedgerLinkError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        Self(value.into_ledgerlink())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → LedgerLinkError */
/* -------------------------------------------------------------------------- */

impl IntoLedgerLinkError for r2d2::Error {
    fn into_ledgerlink(self) -> LedgerLinkError {
        LedgerLinkError::Database(format!("connection pool exhausted: {self}"))
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        Self(value.into_ledgerlink())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → LedgerLinkError */
/* -------------------------------------------------------------------------- */

impl IntoLedgerLinkError for HttpError {
    fn into_ledgerlink(self) -> LedgerLinkError {
        if self.is_timeout() {
            return LedgerLinkError::Transient("HTTP request timed out".into());
        }

        if self.is_connect() {
            return LedgerLinkError::Transient("HTTP connection failure".into());
        }

        if self.is_decode() {
            return LedgerLinkError::Transient(format!("undecodable provider response: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => LedgerLinkError::Authentication(message),
                429 => LedgerLinkError::RateLimited { message, retry_after_secs: None },
                400..=499 => LedgerLinkError::Validation(message),
                _ => LedgerLinkError::Transient(message),
            };
        }

        LedgerLinkError::Transient(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        Self(value.into_ledgerlink())
    }
}

/* -------------------------------------------------------------------------- */
/* Helpers for repository code */
/* -------------------------------------------------------------------------- */

/// Map a rusqlite error straight into the domain error
pub fn map_sql_error(err: SqlError) -> LedgerLinkError {
    LedgerLinkError::from(InfraError::from(err))
}

/// Map a pool checkout failure into the domain error
pub fn map_pool_error(err: r2d2::Error) -> LedgerLinkError {
    LedgerLinkError::from(InfraError::from(err))
}

/// A blocking task panicked or was cancelled
pub fn map_join_error(err: JoinError) -> LedgerLinkError {
    if err.is_cancelled() {
        LedgerLinkError::Cancelled("blocking database task cancelled".into())
    } else {
        LedgerLinkError::Internal(format!("blocking database task failed: {err}"))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
