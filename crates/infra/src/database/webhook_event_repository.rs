//! Webhook delivery repository implementation using SQLite
//!
//! The `(provider, event_id)` idempotency key is enforced by a partial unique
//! index over claiming outcomes, so `insert_claimed` is a single
//! `INSERT OR IGNORE`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_core::WebhookEventRepository;
use ledgerlink_domain::{
    LedgerLinkError, Provider, Result as DomainResult, WebhookEvent, WebhookOutcome, WebhookStats,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;
use uuid::Uuid;

use super::codec::{
    bool_to_int, i64_to_u64, int_to_bool, millis_to_ts, opt_millis_to_ts, opt_ts_to_millis,
    parse_label, parse_uuid, ts_to_millis, u64_to_i64,
};
use super::manager::DbManager;
use crate::errors::{map_join_error, map_sql_error};

/// SQLite-backed implementation of `WebhookEventRepository`
pub struct SqliteWebhookEventRepository {
    db: Arc<DbManager>,
}

impl SqliteWebhookEventRepository {
    /// Create a new repository instance
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WebhookEventRepository for SqliteWebhookEventRepository {
    async fn insert_claimed(&self, event: &WebhookEvent) -> DomainResult<bool> {
        let db = Arc::clone(&self.db);
        let event = event.clone();

        task::spawn_blocking(move || -> DomainResult<bool> {
            if !event.outcome.claims_key() {
                return Err(LedgerLinkError::validation(format!(
                    "outcome '{}' does not claim an idempotency key",
                    event.outcome
                )));
            }
            let conn = db.get_connection()?;
            let inserted = write_event(&conn, INSERT_OR_IGNORE_SQL, &event)?;
            Ok(inserted == 1)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn insert(&self, event: &WebhookEvent) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let event = event.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            write_event(&conn, INSERT_SQL, &event)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn update(&self, event: &WebhookEvent) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let event = event.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let changed = write_event(&conn, UPDATE_SQL, &event)?;
            if changed == 0 {
                return Err(LedgerLinkError::not_found(format!("webhook event {}", event.id)));
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<WebhookEvent>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Option<WebhookEvent>> {
            let conn = db.get_connection()?;
            conn.query_row(SELECT_BY_ID_SQL, params![id.to_string()], map_event_row)
                .optional()
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn find_claimed(
        &self,
        provider: Provider,
        event_id: &str,
    ) -> DomainResult<Option<WebhookEvent>> {
        let db = Arc::clone(&self.db);
        let event_id = event_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<WebhookEvent>> {
            let conn = db.get_connection()?;
            conn.query_row(
                SELECT_CLAIMED_SQL,
                params![provider.to_string(), event_id],
                map_event_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn stats(
        &self,
        integration_id: Uuid,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<WebhookStats> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<WebhookStats> {
            let conn = db.get_connection()?;
            query_stats(&conn, integration_id, since, now)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self, integration_id: Uuid, limit: u32) -> DomainResult<Vec<WebhookEvent>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<WebhookEvent>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(LIST_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![integration_id.to_string(), i64::from(limit)], map_event_row)
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Bind every column in table order; the statements share one parameter layout
fn write_event(conn: &Connection, sql: &str, event: &WebhookEvent) -> DomainResult<usize> {
    conn.execute(
        sql,
        params![
            event.id.to_string(),
            event.provider.to_string(),
            event.integration_id.to_string(),
            event.event_id,
            bool_to_int(event.signature_valid),
            ts_to_millis(event.received_at),
            opt_ts_to_millis(event.processed_at),
            event.latency_ms.map(u64_to_i64),
            event.outcome.to_string(),
            event.error,
            event.raw_payload,
            event.payload_hash,
        ],
    )
    .map_err(map_sql_error)
}

#[allow(clippy::cast_precision_loss)]
fn query_stats(
    conn: &Connection,
    integration_id: Uuid,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DomainResult<WebhookStats> {
    let mut stmt = conn.prepare(STATS_SQL).map_err(map_sql_error)?;
    let rows = stmt
        .query_map(
            params![integration_id.to_string(), ts_to_millis(since), ts_to_millis(now)],
            |row| {
                let outcome: WebhookOutcome = parse_label(0, &row.get::<_, String>(0)?)?;
                Ok((
                    outcome,
                    i64_to_u64(row.get(1)?),
                    i64_to_u64(row.get(2)?),
                    i64_to_u64(row.get(3)?),
                    i64_to_u64(row.get(4)?),
                ))
            },
        )
        .map_err(map_sql_error)?;

    let mut stats = WebhookStats::default();
    let mut latency_total = 0_u64;
    let mut latency_samples = 0_u64;
    for row in rows {
        let (outcome, count, signature_failures, latency_sum, latency_count) =
            row.map_err(map_sql_error)?;
        stats.total += count;
        stats.signature_failures += signature_failures;
        latency_total += latency_sum;
        latency_samples += latency_count;
        match outcome {
            WebhookOutcome::Accepted => stats.accepted += count,
            WebhookOutcome::Duplicate => stats.duplicate += count,
            WebhookOutcome::Rejected => stats.rejected += count,
            WebhookOutcome::Errored => stats.errored += count,
        }
    }

    if latency_samples > 0 {
        stats.average_latency_ms = latency_total as f64 / latency_samples as f64;
    }
    let minutes = (now - since).num_seconds() as f64 / 60.0;
    if minutes > 0.0 {
        stats.deliveries_per_minute = stats.total as f64 / minutes;
    }
    Ok(stats)
}

fn map_event_row(row: &Row<'_>) -> rusqlite::Result<WebhookEvent> {
    let latency: Option<i64> = row.get(7)?;

    Ok(WebhookEvent {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        provider: parse_label(1, &row.get::<_, String>(1)?)?,
        integration_id: parse_uuid(2, &row.get::<_, String>(2)?)?,
        event_id: row.get(3)?,
        signature_valid: int_to_bool(row.get(4)?),
        received_at: millis_to_ts(5, row.get(5)?)?,
        processed_at: opt_millis_to_ts(6, row.get(6)?)?,
        latency_ms: latency.map(i64_to_u64),
        outcome: parse_label(8, &row.get::<_, String>(8)?)?,
        error: row.get(9)?,
        raw_payload: row.get(10)?,
        payload_hash: row.get(11)?,
    })
}

const INSERT_SQL: &str = "INSERT INTO webhook_events (id, provider, integration_id, event_id,
        signature_valid, received_at, processed_at, latency_ms, outcome, error, raw_payload,
        payload_hash)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const INSERT_OR_IGNORE_SQL: &str = "INSERT OR IGNORE INTO webhook_events (id, provider,
        integration_id, event_id, signature_valid, received_at, processed_at, latency_ms, outcome,
        error, raw_payload, payload_hash)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const UPDATE_SQL: &str = "UPDATE webhook_events
     SET provider = ?2, integration_id = ?3, event_id = ?4, signature_valid = ?5,
         received_at = ?6, processed_at = ?7, latency_ms = ?8, outcome = ?9, error = ?10,
         raw_payload = ?11, payload_hash = ?12
     WHERE id = ?1";

const SELECT_BY_ID_SQL: &str = "SELECT id, provider, integration_id, event_id, signature_valid,
        received_at, processed_at, latency_ms, outcome, error, raw_payload, payload_hash
     FROM webhook_events WHERE id = ?1";

const SELECT_CLAIMED_SQL: &str = "SELECT id, provider, integration_id, event_id, signature_valid,
        received_at, processed_at, latency_ms, outcome, error, raw_payload, payload_hash
     FROM webhook_events
     WHERE provider = ?1 AND event_id = ?2 AND outcome IN ('accepted', 'errored')";

const STATS_SQL: &str = "SELECT outcome,
        COUNT(*),
        SUM(CASE WHEN signature_valid = 0 THEN 1 ELSE 0 END),
        COALESCE(SUM(latency_ms), 0),
        COUNT(latency_ms)
     FROM webhook_events
     WHERE integration_id = ?1 AND received_at >= ?2 AND received_at <= ?3
     GROUP BY outcome";

const LIST_SQL: &str = "SELECT id, provider, integration_id, event_id, signature_valid,
        received_at, processed_at, latency_ms, outcome, error, raw_payload, payload_hash
     FROM webhook_events WHERE integration_id = ?1
     ORDER BY received_at DESC, id DESC
     LIMIT ?2";

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("timestamp")
    }

    fn setup() -> (TempDir, SqliteWebhookEventRepository) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = DbManager::new(temp_dir.path().join("test.db"), 2, Duration::from_secs(1))
            .expect("manager created");
        db.run_migrations().expect("migrations run");
        (temp_dir, SqliteWebhookEventRepository::new(Arc::new(db)))
    }

    fn event(integration_id: Uuid, event_id: &str, outcome: WebhookOutcome, received: i64) -> WebhookEvent {
        WebhookEvent {
            id: Uuid::now_v7(),
            provider: Provider::Square,
            integration_id,
            event_id: event_id.into(),
            signature_valid: outcome != WebhookOutcome::Rejected,
            received_at: at(received),
            processed_at: None,
            latency_ms: None,
            outcome,
            error: None,
            raw_payload: None,
            payload_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive_per_provider_event() {
        let (_dir, repo) = setup();
        let integration_id = Uuid::now_v7();

        let first = event(integration_id, "evt-1", WebhookOutcome::Accepted, 0);
        assert!(repo.insert_claimed(&first).await.expect("claim"));

        let second = event(integration_id, "evt-1", WebhookOutcome::Accepted, 1);
        assert!(!repo.insert_claimed(&second).await.expect("claim"));
        assert!(repo.get(second.id).await.expect("query").is_none());

        // Non-claiming rows may repeat the key
        let duplicate = event(integration_id, "evt-1", WebhookOutcome::Duplicate, 2);
        repo.insert(&duplicate).await.expect("duplicate row");

        let holder = repo.find_claimed(Provider::Square, "evt-1").await.expect("query").expect("held");
        assert_eq!(holder.id, first.id);
        assert!(repo.find_claimed(Provider::Shopify, "evt-1").await.expect("query").is_none());

        let rejected = event(integration_id, "evt-9", WebhookOutcome::Rejected, 3);
        assert!(repo.insert_claimed(&rejected).await.is_err());
    }

    #[tokio::test]
    async fn update_moves_errored_row_to_accepted() {
        let (_dir, repo) = setup();
        let integration_id = Uuid::now_v7();

        let mut errored = event(integration_id, "evt-2", WebhookOutcome::Errored, 0);
        errored.error = Some("database unavailable".into());
        errored.raw_payload = Some("{\"id\":\"evt-2\"}".into());
        assert!(repo.insert_claimed(&errored).await.expect("claim"));

        errored.outcome = WebhookOutcome::Accepted;
        errored.error = None;
        errored.raw_payload = None;
        errored.finish(at(0) + chrono::Duration::milliseconds(250));
        repo.update(&errored).await.expect("updated");

        let stored = repo.get(errored.id).await.expect("query").expect("present");
        assert_eq!(stored, errored);
        assert_eq!(stored.latency_ms, Some(250));

        let missing = event(integration_id, "evt-3", WebhookOutcome::Accepted, 0);
        assert!(matches!(repo.update(&missing).await, Err(LedgerLinkError::NotFound(_))));
    }

    #[tokio::test]
    async fn stats_cover_window_outcomes_and_latency() {
        let (_dir, repo) = setup();
        let integration_id = Uuid::now_v7();

        let mut fast = event(integration_id, "a", WebhookOutcome::Accepted, 10);
        fast.latency_ms = Some(100);
        let mut slow = event(integration_id, "b", WebhookOutcome::Accepted, 20);
        slow.latency_ms = Some(300);
        assert!(repo.insert_claimed(&fast).await.expect("claim"));
        assert!(repo.insert_claimed(&slow).await.expect("claim"));
        repo.insert(&event(integration_id, "c", WebhookOutcome::Rejected, 30)).await.expect("row");
        repo.insert(&event(integration_id, "a", WebhookOutcome::Duplicate, 40)).await.expect("row");
        // Outside the window
        repo.insert(&event(integration_id, "old", WebhookOutcome::Rejected, -600)).await.expect("row");
        // Other integration
        repo.insert(&event(Uuid::now_v7(), "z", WebhookOutcome::Rejected, 10)).await.expect("row");

        let stats = repo.stats(integration_id, at(0), at(120)).await.expect("stats");
        assert_eq!(stats.total, 4);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.duplicate, 1);
        assert_eq!(stats.signature_failures, 1);
        assert!((stats.average_latency_ms - 200.0).abs() < 1e-9);
        assert!((stats.deliveries_per_minute - 2.0).abs() < 1e-9);
        assert!((stats.error_rate() - 0.25).abs() < 1e-9);

        let listed = repo.list(integration_id, 2).await.expect("listed");
        assert_eq!(listed.iter().map(|e| e.received_at).collect::<Vec<_>>(), vec![at(40), at(30)]);
    }
}
