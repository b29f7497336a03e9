//! Platform-side expected transactions, provider-reported transactions and
//! the provider ledger that records how each provider transaction was
//! classified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::integration::Provider;
use crate::{impl_domain_status_conversions, LedgerLinkError, Result};

/// Verification state of an expected transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Pending,
    Synced,
    Failed,
    Overridden,
}

impl_domain_status_conversions!(VerificationState {
    Pending => "pending",
    Synced => "synced",
    Failed => "failed",
    Overridden => "overridden",
});

/// Why a record ended up `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No provider counterpart after every retry
    Stale,
    /// Provider reported the same transaction with a different amount
    AmountMismatch,
}

impl_domain_status_conversions!(FailureReason {
    Stale => "stale",
    AmountMismatch => "amount_mismatch",
});

/// Expected transaction created by upstream business logic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub business_id: String,
    /// Amount in integer minor units (cents)
    pub amount_minor: i64,
    /// ISO 4217 code, upper case
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub state: VerificationState,
    pub matched_provider_txn_id: Option<String>,
    pub failure_reason: Option<FailureReason>,
    /// Staleness retries performed so far
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub override_amount_minor: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Whether the record still waits for a provider counterpart
    pub fn is_pending(&self) -> bool {
        self.state == VerificationState::Pending
    }

    /// Age of the record at `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Intake request for a new expected transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransactionRecord {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub integration_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NewTransactionRecord {
    pub fn validate(&self) -> Result<()> {
        if self.amount_minor <= 0 {
            return Err(LedgerLinkError::validation("amount_minor must be positive"));
        }
        if !is_currency_code(&self.currency) {
            return Err(LedgerLinkError::validation(format!(
                "currency must be a three-letter ISO code, got '{}'",
                self.currency
            )));
        }
        Ok(())
    }

    /// Build the pending record owned by `business_id`
    pub fn into_record(self, business_id: String, now: DateTime<Utc>) -> TransactionRecord {
        TransactionRecord {
            id: self.id.unwrap_or_else(Uuid::now_v7),
            integration_id: self.integration_id,
            business_id,
            amount_minor: self.amount_minor,
            currency: self.currency.to_ascii_uppercase(),
            created_at: self.created_at.unwrap_or(now),
            state: VerificationState::Pending,
            matched_provider_txn_id: None,
            failure_reason: None,
            attempts: 0,
            next_attempt_at: None,
            override_amount_minor: None,
            updated_at: now,
        }
    }
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

/// A single guarded change to a record
///
/// Applied by repositories as a compare-and-set against the expected current
/// state; `ScheduleRetry` keeps the record `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordUpdate {
    MarkSynced { provider_txn_id: String },
    MarkFailed { reason: FailureReason, provider_txn_id: Option<String> },
    MarkOverridden { amount_minor: i64 },
    ScheduleRetry { attempts: u32, next_attempt_at: DateTime<Utc> },
}

impl RecordUpdate {
    /// State the record holds after the update
    pub const fn target_state(&self) -> VerificationState {
        match self {
            Self::MarkSynced { .. } => VerificationState::Synced,
            Self::MarkFailed { .. } => VerificationState::Failed,
            Self::MarkOverridden { .. } => VerificationState::Overridden,
            Self::ScheduleRetry { .. } => VerificationState::Pending,
        }
    }

    /// Apply to an in-memory record; callers must have checked the CAS guard
    pub fn apply(&self, record: &mut TransactionRecord, now: DateTime<Utc>) {
        record.state = self.target_state();
        record.updated_at = now;
        match self {
            Self::MarkSynced { provider_txn_id } => {
                record.matched_provider_txn_id = Some(provider_txn_id.clone());
                record.failure_reason = None;
                record.next_attempt_at = None;
            }
            Self::MarkFailed { reason, provider_txn_id } => {
                record.failure_reason = Some(*reason);
                if provider_txn_id.is_some() {
                    record.matched_provider_txn_id.clone_from(provider_txn_id);
                }
                record.next_attempt_at = None;
            }
            Self::MarkOverridden { amount_minor } => {
                record.override_amount_minor = Some(*amount_minor);
                record.next_attempt_at = None;
            }
            Self::ScheduleRetry { attempts, next_attempt_at } => {
                record.attempts = *attempts;
                record.next_attempt_at = Some(*next_attempt_at);
            }
        }
    }
}

/// Counts of records per verification state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: u64,
    pub synced: u64,
    pub failed: u64,
    pub overridden: u64,
}

impl StateCounts {
    /// Records that reached a terminal classification
    pub const fn classified(&self) -> u64 {
        self.synced + self.failed + self.overridden
    }

    /// `failed / (synced + failed + overridden)`; overridden never counts as a
    /// failure
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let total = self.classified();
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }

    pub fn add(&mut self, state: VerificationState) {
        match state {
            VerificationState::Pending => self.pending += 1,
            VerificationState::Synced => self.synced += 1,
            VerificationState::Failed => self.failed += 1,
            VerificationState::Overridden => self.overridden += 1,
        }
    }
}

/// Transaction as reported by a provider fetch or webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTransaction {
    pub provider: Provider,
    pub provider_txn_id: String,
    pub business_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    /// Platform record id the provider echoes back, when the POS supports it
    pub platform_reference: Option<String>,
    /// SHA-256 hex of the provider object
    pub payload_hash: String,
}

impl ProviderTransaction {
    /// Platform reference parsed as a record id, if it is one
    pub fn referenced_record(&self) -> Option<Uuid> {
        self.platform_reference.as_deref().and_then(|r| Uuid::parse_str(r.trim()).ok())
    }
}

/// SHA-256 hex digest of raw bytes
pub fn payload_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// How a provider transaction was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    Matched,
    Ambiguous,
    AmountMismatch,
    Unexpected,
}

impl_domain_status_conversions!(LedgerOutcome {
    Matched => "matched",
    Ambiguous => "ambiguous",
    AmountMismatch => "amount_mismatch",
    Unexpected => "unexpected",
});

/// Audit row for every provider transaction the engine processed
///
/// Unique per (integration, provider transaction id); its presence makes a
/// re-fetch of the same transaction a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLedgerEntry {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub provider: Provider,
    pub provider_txn_id: String,
    pub outcome: LedgerOutcome,
    pub record_id: Option<Uuid>,
    /// Every candidate considered when the match was ambiguous
    pub candidate_ids: Vec<Uuid>,
    pub amount_minor: i64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    pub payload_hash: String,
    pub recorded_at: DateTime<Utc>,
}

impl ProviderLedgerEntry {
    pub fn new(
        integration_id: Uuid,
        txn: &ProviderTransaction,
        outcome: LedgerOutcome,
        record_id: Option<Uuid>,
        candidate_ids: Vec<Uuid>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            integration_id,
            provider: txn.provider,
            provider_txn_id: txn.provider_txn_id.clone(),
            outcome,
            record_id,
            candidate_ids,
            amount_minor: txn.amount_minor,
            currency: txn.currency.clone(),
            occurred_at: txn.occurred_at,
            payload_hash: txn.payload_hash.clone(),
            recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_intake_validation() {
        let mut request = NewTransactionRecord {
            id: None,
            integration_id: Uuid::now_v7(),
            amount_minor: 15_000,
            currency: "usd".into(),
            created_at: None,
        };
        request.validate().unwrap();
        let record = request.clone().into_record("biz-1".into(), now());
        assert_eq!(record.currency, "USD");
        assert_eq!(record.state, VerificationState::Pending);
        assert_eq!(record.created_at, now());

        request.amount_minor = 0;
        assert!(request.validate().is_err());
        request.amount_minor = 1;
        request.currency = "US".into();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_failure_rate_excludes_overrides() {
        let mut counts = StateCounts::default();
        assert!(counts.failure_rate().abs() < f64::EPSILON);
        for state in [
            VerificationState::Synced,
            VerificationState::Synced,
            VerificationState::Failed,
            VerificationState::Overridden,
            VerificationState::Pending,
        ] {
            counts.add(state);
        }
        assert_eq!(counts.classified(), 4);
        assert!((counts.failure_rate() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_record_update_apply() {
        let mut record = NewTransactionRecord {
            id: None,
            integration_id: Uuid::now_v7(),
            amount_minor: 100,
            currency: "EUR".into(),
            created_at: None,
        }
        .into_record("biz".into(), now());

        RecordUpdate::ScheduleRetry { attempts: 1, next_attempt_at: now() }.apply(&mut record, now());
        assert_eq!(record.state, VerificationState::Pending);
        assert_eq!(record.attempts, 1);

        RecordUpdate::MarkFailed { reason: FailureReason::Stale, provider_txn_id: None }
            .apply(&mut record, now());
        assert_eq!(record.state, VerificationState::Failed);
        assert_eq!(record.failure_reason, Some(FailureReason::Stale));
        assert_eq!(record.next_attempt_at, None);
    }

    #[test]
    fn test_payload_hash_is_sha256_hex() {
        assert_eq!(
            payload_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
