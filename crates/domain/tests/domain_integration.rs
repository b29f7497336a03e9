//! Integration tests for domain types
//!
//! Covers the cross-type flows the engine relies on: webhook payloads
//! normalizing into provider transactions that reference expected records,
//! and record updates driving the failure-rate arithmetic.

use chrono::{DateTime, Duration, Utc};
use ledgerlink_domain::{
    NewTransactionRecord, Provider, ProviderWebhook, RecordUpdate, StateCounts, VerificationState,
};
use uuid::Uuid;

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_709_287_200, 0).unwrap()
}

/// Validates that a provider echoing the platform record id produces a
/// transaction whose reference resolves back to that record.
///
/// # Test Steps
/// 1. Create an expected record of 150.00 USD
/// 2. Decode a Square webhook that carries the record id as `reference_id`
/// 3. Verify the normalized transaction references the record and agrees on
///    amount and currency
#[test]
fn test_webhook_reference_resolves_to_record() {
    let record = NewTransactionRecord {
        id: None,
        integration_id: Uuid::now_v7(),
        amount_minor: 15_000,
        currency: "USD".into(),
        created_at: Some(t0()),
    }
    .into_record("biz-1".into(), t0());

    let body = serde_json::json!({
        "type": "payment.created",
        "event_id": "evt-ref",
        "created_at": "2024-03-01T10:02:00Z",
        "data": {
            "type": "payment",
            "id": "pay-ref",
            "object": {"payment": {
                "id": "pay-ref",
                "status": "COMPLETED",
                "amount_money": {"amount": 15000, "currency": "USD"},
                "created_at": (t0() + Duration::minutes(2)).to_rfc3339(),
                "reference_id": record.id.to_string()
            }}
        }
    });
    let webhook =
        ProviderWebhook::decode(Provider::Square, &serde_json::to_vec(&body).unwrap(), None).unwrap();
    let txn = webhook.normalize(&record.business_id).unwrap().remove(0);

    assert_eq!(txn.referenced_record(), Some(record.id));
    assert_eq!(txn.amount_minor, record.amount_minor);
    assert_eq!(txn.currency, record.currency);
    assert!((txn.occurred_at - record.created_at).num_minutes() <= 10);
}

/// Validates that overriding a failed record removes it from the failure
/// rate numerator.
///
/// Assertions:
/// - A failed record yields a failure rate of 1.0 on its own
/// - After `MarkOverridden` the rate drops to 0.0
#[test]
fn test_override_leaves_failure_rate() {
    let mut record = NewTransactionRecord {
        id: None,
        integration_id: Uuid::now_v7(),
        amount_minor: 15_000,
        currency: "USD".into(),
        created_at: Some(t0()),
    }
    .into_record("biz-1".into(), t0());

    RecordUpdate::MarkFailed { reason: ledgerlink_domain::FailureReason::Stale, provider_txn_id: None }
        .apply(&mut record, t0());
    let mut counts = StateCounts::default();
    counts.add(record.state);
    assert!((counts.failure_rate() - 1.0).abs() < f64::EPSILON);

    RecordUpdate::MarkOverridden { amount_minor: 15_000 }.apply(&mut record, t0());
    assert_eq!(record.state, VerificationState::Overridden);
    let mut counts = StateCounts::default();
    counts.add(record.state);
    assert!(counts.failure_rate().abs() < f64::EPSILON);
}

#[test]
fn test_provider_names_round_trip() {
    for provider in Provider::ALL {
        assert_eq!(provider.to_string().parse::<Provider>().unwrap(), provider);
    }
    assert!("clover".parse::<Provider>().is_err());
}
