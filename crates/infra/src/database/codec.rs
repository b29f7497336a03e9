//! Column codecs shared by the SQLite repositories
//!
//! Timestamps are stored as unix epoch milliseconds, ids as hyphenated UUID
//! text, enums as their snake_case labels and compound values as JSON text.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use ledgerlink_domain::{LedgerLinkError, Result};

pub fn ts_to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn opt_ts_to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(ts_to_millis)
}

pub fn millis_to_ts(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp out of range: {millis}")))
}

pub fn opt_millis_to_ts(idx: usize, millis: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    millis.map(|m| millis_to_ts(idx, m)).transpose()
}

pub fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}

pub fn parse_opt_uuid(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<Uuid>> {
    raw.as_deref().map(|r| parse_uuid(idx, r)).transpose()
}

/// Parse a label column through the enum's `FromStr`
pub fn parse_label<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>().map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}

pub fn parse_json<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}

pub fn parse_opt_json<T: DeserializeOwned>(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<T>> {
    raw.as_deref().map(|r| parse_json(idx, r)).transpose()
}

/// Serialize a value for a JSON text column
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| LedgerLinkError::Internal(format!("failed to encode column: {e}")))
}

pub fn to_opt_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value.map(to_json).transpose()
}

pub const fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub const fn int_to_bool(value: i64) -> bool {
    value != 0
}

/// Clamp an unsigned count into an SQLite integer
pub fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Read a non-negative SQLite integer back into an unsigned count
pub fn i64_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub fn i64_to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

#[cfg(test)]
mod tests {
    use ledgerlink_domain::VerificationState;

    use super::*;

    #[test]
    fn timestamps_keep_millisecond_precision() {
        let ts = DateTime::from_timestamp_millis(1_700_000_000_123).expect("valid timestamp");
        assert_eq!(millis_to_ts(0, ts_to_millis(ts)).expect("decoded"), ts);
        assert!(millis_to_ts(0, i64::MAX).is_err());
    }

    #[test]
    fn labels_parse_through_from_str() {
        let state: VerificationState = parse_label(0, "overridden").expect("label");
        assert_eq!(state, VerificationState::Overridden);
        assert!(parse_label::<VerificationState>(0, "unknown").is_err());
    }

    #[test]
    fn counts_clamp_at_bounds() {
        assert_eq!(u64_to_i64(u64::MAX), i64::MAX);
        assert_eq!(i64_to_u64(-5), 0);
        assert_eq!(i64_to_u32(i64::from(u32::MAX) + 1), u32::MAX);
        assert_eq!(i64_to_u32(-1), 0);
    }
}
