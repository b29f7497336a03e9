//! Candidate selection for provider transactions
//!
//! Pure functions; the engine loads candidates and applies the decision with a
//! compare-and-set.

use chrono::Duration;
use ledgerlink_domain::{ProviderTransaction, ReconciliationConfig, TransactionRecord};
use uuid::Uuid;

/// Tolerances applied when pairing a provider transaction with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCriteria {
    pub amount_tolerance_minor: i64,
    pub window: Duration,
}

impl From<&ReconciliationConfig> for MatchCriteria {
    fn from(config: &ReconciliationConfig) -> Self {
        Self { amount_tolerance_minor: config.amount_tolerance_minor, window: config.match_window() }
    }
}

impl MatchCriteria {
    fn amount_matches(&self, txn: &ProviderTransaction, record: &TransactionRecord) -> bool {
        txn.currency.eq_ignore_ascii_case(&record.currency)
            && (txn.amount_minor - record.amount_minor).abs() <= self.amount_tolerance_minor
    }

    fn within_window(&self, txn: &ProviderTransaction, record: &TransactionRecord) -> bool {
        (record.created_at - txn.occurred_at).abs() <= self.window
    }
}

/// What to do with a provider transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    /// Mark `record_id` synced; `candidates` lists every contender when the
    /// choice was ambiguous and is empty otherwise
    Matched { record_id: Uuid, candidates: Vec<Uuid> },
    /// The referenced record disagrees on amount or currency
    AmountMismatch { record_id: Uuid },
    /// No record qualifies
    Unexpected,
}

impl MatchDecision {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Matched { candidates, .. } if !candidates.is_empty())
    }
}

/// Judge a record named by the transaction's platform reference
///
/// Returns `None` when the reference cannot be used (another business's
/// record, or one that is no longer pending) so the caller falls back to
/// window matching.
pub fn judge_reference(
    txn: &ProviderTransaction,
    record: &TransactionRecord,
    criteria: &MatchCriteria,
) -> Option<MatchDecision> {
    if record.business_id != txn.business_id || !record.is_pending() {
        return None;
    }
    Some(if criteria.amount_matches(txn, record) {
        MatchDecision::Matched { record_id: record.id, candidates: Vec::new() }
    } else {
        MatchDecision::AmountMismatch { record_id: record.id }
    })
}

/// Pick the best pending record for `txn`
///
/// Qualifying records share business and currency, lie within the match
/// window and within the amount tolerance. Several qualifying records resolve
/// to the closest timestamp, then earliest creation, then lowest id.
pub fn select_candidate(
    txn: &ProviderTransaction,
    records: &[TransactionRecord],
    criteria: &MatchCriteria,
) -> MatchDecision {
    let mut qualifying: Vec<&TransactionRecord> = records
        .iter()
        .filter(|record| {
            record.is_pending()
                && record.business_id == txn.business_id
                && criteria.within_window(txn, record)
                && criteria.amount_matches(txn, record)
        })
        .collect();

    qualifying.sort_by_key(|record| {
        ((record.created_at - txn.occurred_at).abs(), record.created_at, record.id)
    });

    match qualifying.as_slice() {
        [] => MatchDecision::Unexpected,
        [only] => MatchDecision::Matched { record_id: only.id, candidates: Vec::new() },
        [best, ..] => MatchDecision::Matched {
            record_id: best.id,
            candidates: qualifying.iter().map(|record| record.id).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use ledgerlink_domain::{NewTransactionRecord, Provider, VerificationState};

    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_704_067_200, 0).unwrap()
    }

    fn criteria() -> MatchCriteria {
        MatchCriteria { amount_tolerance_minor: 1, window: Duration::minutes(10) }
    }

    fn record(amount_minor: i64, created_at: DateTime<Utc>) -> TransactionRecord {
        NewTransactionRecord {
            id: None,
            integration_id: Uuid::nil(),
            amount_minor,
            currency: "usd".into(),
            created_at: Some(created_at),
        }
        .into_record("biz-1".into(), created_at)
    }

    fn txn(amount_minor: i64, occurred_at: DateTime<Utc>) -> ProviderTransaction {
        ProviderTransaction {
            provider: Provider::Square,
            provider_txn_id: "pay-1".into(),
            business_id: "biz-1".into(),
            amount_minor,
            currency: "USD".into(),
            occurred_at,
            platform_reference: None,
            payload_hash: String::new(),
        }
    }

    #[test]
    fn test_single_match_within_window() {
        let expected = record(15_000, t0());
        let decision =
            select_candidate(&txn(15_000, t0() + Duration::minutes(2)), &[expected.clone()], &criteria());
        assert_eq!(decision, MatchDecision::Matched { record_id: expected.id, candidates: vec![] });
    }

    #[test]
    fn test_outside_window_or_tolerance_is_unexpected() {
        let records = [record(15_000, t0())];
        assert_eq!(
            select_candidate(&txn(15_000, t0() + Duration::minutes(11)), &records, &criteria()),
            MatchDecision::Unexpected
        );
        assert_eq!(
            select_candidate(&txn(15_002, t0()), &records, &criteria()),
            MatchDecision::Unexpected
        );
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let expected = record(15_000, t0());
        assert!(matches!(
            select_candidate(&txn(14_999, t0() + Duration::minutes(10)), &[expected], &criteria()),
            MatchDecision::Matched { .. }
        ));
    }

    /// Validates ambiguity resolution.
    ///
    /// Assertions:
    /// - The record closest in time wins
    /// - Every qualifying record is reported as a candidate
    #[test]
    fn test_ambiguous_prefers_closest_timestamp() {
        let far = record(15_000, t0() - Duration::minutes(8));
        let near = record(15_000, t0() + Duration::minutes(1));
        let other_business = TransactionRecord { business_id: "biz-2".into(), ..record(15_000, t0()) };

        let decision = select_candidate(
            &txn(15_000, t0()),
            &[far.clone(), near.clone(), other_business],
            &criteria(),
        );
        assert!(decision.is_ambiguous());
        match decision {
            MatchDecision::Matched { record_id, candidates } => {
                assert_eq!(record_id, near.id);
                assert_eq!(candidates, vec![near.id, far.id]);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_equal_distance_breaks_tie_by_creation() {
        let before = record(15_000, t0() - Duration::minutes(3));
        let after = record(15_000, t0() + Duration::minutes(3));
        let decision = select_candidate(&txn(15_000, t0()), &[after, before.clone()], &criteria());
        assert!(matches!(decision, MatchDecision::Matched { record_id, .. } if record_id == before.id));
    }

    #[test]
    fn test_reference_judgement() {
        let expected = record(15_000, t0());
        assert_eq!(
            judge_reference(&txn(15_000, t0() + Duration::hours(3)), &expected, &criteria()),
            Some(MatchDecision::Matched { record_id: expected.id, candidates: vec![] })
        );
        assert_eq!(
            judge_reference(&txn(14_000, t0()), &expected, &criteria()),
            Some(MatchDecision::AmountMismatch { record_id: expected.id })
        );

        let eur = ProviderTransaction { currency: "EUR".into(), ..txn(15_000, t0()) };
        assert_eq!(
            judge_reference(&eur, &expected, &criteria()),
            Some(MatchDecision::AmountMismatch { record_id: expected.id })
        );

        let synced = TransactionRecord { state: VerificationState::Synced, ..expected.clone() };
        assert_eq!(judge_reference(&txn(15_000, t0()), &synced, &criteria()), None);

        let foreign = TransactionRecord { business_id: "biz-9".into(), ..expected };
        assert_eq!(judge_reference(&txn(15_000, t0()), &foreign, &criteria()), None);
    }
}
