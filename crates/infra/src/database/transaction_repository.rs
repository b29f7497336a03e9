//! Expected-transaction repository implementation using SQLite
//!
//! State changes go through `compare_and_set`, which reads, applies and writes
//! the record inside an immediate transaction guarded on the expected state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_core::{TransactionFilter, TransactionRepository};
use ledgerlink_domain::{
    RecordUpdate, Result as DomainResult, StateCounts, TransactionRecord, VerificationState,
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tokio::task;
use uuid::Uuid;

use super::codec::{
    i64_to_u32, i64_to_u64, millis_to_ts, opt_millis_to_ts, opt_ts_to_millis, parse_label,
    parse_uuid, ts_to_millis,
};
use super::manager::DbManager;
use crate::errors::{map_join_error, map_sql_error};

/// SQLite-backed implementation of `TransactionRepository`
pub struct SqliteTransactionRepository {
    db: Arc<DbManager>,
}

impl SqliteTransactionRepository {
    /// Create a new repository instance
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TransactionRepository for SqliteTransactionRepository {
    async fn insert(&self, record: &TransactionRecord) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let record = record.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute(
                INSERT_SQL,
                params![
                    record.id.to_string(),
                    record.integration_id.to_string(),
                    record.business_id,
                    record.amount_minor,
                    record.currency,
                    ts_to_millis(record.created_at),
                    record.state.to_string(),
                    record.matched_provider_txn_id,
                    record.failure_reason.map(|r| r.to_string()),
                    i64::from(record.attempts),
                    opt_ts_to_millis(record.next_attempt_at),
                    record.override_amount_minor,
                    ts_to_millis(record.updated_at),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<TransactionRecord>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Option<TransactionRecord>> {
            let conn = db.get_connection()?;
            load_record(&conn, id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn find_by_provider_txn(
        &self,
        integration_id: Uuid,
        provider_txn_id: &str,
    ) -> DomainResult<Option<TransactionRecord>> {
        let db = Arc::clone(&self.db);
        let provider_txn_id = provider_txn_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<TransactionRecord>> {
            let conn = db.get_connection()?;
            conn.query_row(
                SELECT_BY_PROVIDER_TXN_SQL,
                params![integration_id.to_string(), provider_txn_id],
                map_record_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn pending_candidates(
        &self,
        integration_id: Uuid,
        currency: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<TransactionRecord>> {
        let db = Arc::clone(&self.db);
        let currency = currency.to_string();

        task::spawn_blocking(move || -> DomainResult<Vec<TransactionRecord>> {
            let conn = db.get_connection()?;
            query_records(
                &conn,
                SELECT_CANDIDATES_SQL,
                params![
                    integration_id.to_string(),
                    VerificationState::Pending.to_string(),
                    currency,
                    ts_to_millis(from),
                    ts_to_millis(to)
                ],
            )
        })
        .await
        .map_err(map_join_error)?
    }

    async fn due_for_retry(
        &self,
        integration_id: Uuid,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: u32,
    ) -> DomainResult<Vec<TransactionRecord>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<TransactionRecord>> {
            let conn = db.get_connection()?;
            query_records(
                &conn,
                SELECT_DUE_SQL,
                params![
                    integration_id.to_string(),
                    VerificationState::Pending.to_string(),
                    ts_to_millis(created_before),
                    ts_to_millis(now),
                    i64::from(limit)
                ],
            )
        })
        .await
        .map_err(map_join_error)?
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: VerificationState,
        update: &RecordUpdate,
        at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let db = Arc::clone(&self.db);
        let update = update.clone();

        task::spawn_blocking(move || -> DomainResult<bool> {
            let mut conn = db.get_connection()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sql_error)?;

            let Some(mut record) = load_record(&tx, id)? else {
                return Ok(false);
            };
            if record.state != expected {
                return Ok(false);
            }
            update.apply(&mut record, at);

            let changed = tx
                .execute(
                    CAS_UPDATE_SQL,
                    params![
                        id.to_string(),
                        expected.to_string(),
                        record.state.to_string(),
                        record.matched_provider_txn_id,
                        record.failure_reason.map(|r| r.to_string()),
                        i64::from(record.attempts),
                        opt_ts_to_millis(record.next_attempt_at),
                        record.override_amount_minor,
                        ts_to_millis(record.updated_at),
                    ],
                )
                .map_err(map_sql_error)?;
            tx.commit().map_err(map_sql_error)?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn state_counts(
        &self,
        integration_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> DomainResult<StateCounts> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<StateCounts> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(STATE_COUNTS_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(
                    params![integration_id.to_string(), opt_ts_to_millis(since)],
                    |row| {
                        let state: VerificationState = parse_label(0, &row.get::<_, String>(0)?)?;
                        Ok((state, i64_to_u64(row.get(1)?)))
                    },
                )
                .map_err(map_sql_error)?;

            let mut counts = StateCounts::default();
            for row in rows {
                let (state, count) = row.map_err(map_sql_error)?;
                match state {
                    VerificationState::Pending => counts.pending = count,
                    VerificationState::Synced => counts.synced = count,
                    VerificationState::Failed => counts.failed = count,
                    VerificationState::Overridden => counts.overridden = count,
                }
            }
            Ok(counts)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self, filter: &TransactionFilter) -> DomainResult<Vec<TransactionRecord>> {
        let db = Arc::clone(&self.db);
        let filter = filter.clone();

        task::spawn_blocking(move || -> DomainResult<Vec<TransactionRecord>> {
            let conn = db.get_connection()?;
            query_records(
                &conn,
                LIST_SQL,
                params![
                    filter.integration_id.map(|id| id.to_string()),
                    filter.state.map(|s| s.to_string()),
                    i64::from(filter.limit)
                ],
            )
        })
        .await
        .map_err(map_join_error)?
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn load_record(conn: &Connection, id: Uuid) -> DomainResult<Option<TransactionRecord>> {
    conn.query_row(SELECT_BY_ID_SQL, params![id.to_string()], map_record_row)
        .optional()
        .map_err(map_sql_error)
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> DomainResult<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare(sql).map_err(map_sql_error)?;
    let rows = stmt.query_map(params, map_record_row).map_err(map_sql_error)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
}

fn map_record_row(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    let failure_reason: Option<String> = row.get(8)?;

    Ok(TransactionRecord {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        integration_id: parse_uuid(1, &row.get::<_, String>(1)?)?,
        business_id: row.get(2)?,
        amount_minor: row.get(3)?,
        currency: row.get(4)?,
        created_at: millis_to_ts(5, row.get(5)?)?,
        state: parse_label(6, &row.get::<_, String>(6)?)?,
        matched_provider_txn_id: row.get(7)?,
        failure_reason: failure_reason.as_deref().map(|r| parse_label(8, r)).transpose()?,
        attempts: i64_to_u32(row.get(9)?),
        next_attempt_at: opt_millis_to_ts(10, row.get(10)?)?,
        override_amount_minor: row.get(11)?,
        updated_at: millis_to_ts(12, row.get(12)?)?,
    })
}

const INSERT_SQL: &str = "INSERT INTO transaction_records (id, integration_id, business_id,
        amount_minor, currency, created_at, state, matched_provider_txn_id, failure_reason,
        attempts, next_attempt_at, override_amount_minor, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const SELECT_BY_ID_SQL: &str = "SELECT id, integration_id, business_id, amount_minor, currency,
        created_at, state, matched_provider_txn_id, failure_reason, attempts, next_attempt_at,
        override_amount_minor, updated_at
     FROM transaction_records WHERE id = ?1";

const SELECT_BY_PROVIDER_TXN_SQL: &str = "SELECT id, integration_id, business_id, amount_minor,
        currency, created_at, state, matched_provider_txn_id, failure_reason, attempts,
        next_attempt_at, override_amount_minor, updated_at
     FROM transaction_records
     WHERE integration_id = ?1 AND matched_provider_txn_id = ?2
     ORDER BY updated_at DESC
     LIMIT 1";

const SELECT_CANDIDATES_SQL: &str = "SELECT id, integration_id, business_id, amount_minor,
        currency, created_at, state, matched_provider_txn_id, failure_reason, attempts,
        next_attempt_at, override_amount_minor, updated_at
     FROM transaction_records
     WHERE integration_id = ?1 AND state = ?2 AND currency = ?3
       AND created_at >= ?4 AND created_at <= ?5
     ORDER BY created_at ASC, id ASC";

const SELECT_DUE_SQL: &str = "SELECT id, integration_id, business_id, amount_minor, currency,
        created_at, state, matched_provider_txn_id, failure_reason, attempts, next_attempt_at,
        override_amount_minor, updated_at
     FROM transaction_records
     WHERE integration_id = ?1 AND state = ?2 AND created_at <= ?3
       AND (next_attempt_at IS NULL OR next_attempt_at <= ?4)
     ORDER BY created_at ASC, id ASC
     LIMIT ?5";

const CAS_UPDATE_SQL: &str = "UPDATE transaction_records
     SET state = ?3, matched_provider_txn_id = ?4, failure_reason = ?5, attempts = ?6,
         next_attempt_at = ?7, override_amount_minor = ?8, updated_at = ?9
     WHERE id = ?1 AND state = ?2";

const STATE_COUNTS_SQL: &str = "SELECT state, COUNT(*) FROM transaction_records
     WHERE integration_id = ?1 AND (?2 IS NULL OR created_at >= ?2)
     GROUP BY state";

const LIST_SQL: &str = "SELECT id, integration_id, business_id, amount_minor, currency,
        created_at, state, matched_provider_txn_id, failure_reason, attempts, next_attempt_at,
        override_amount_minor, updated_at
     FROM transaction_records
     WHERE (?1 IS NULL OR integration_id = ?1) AND (?2 IS NULL OR state = ?2)
     ORDER BY created_at DESC, id DESC
     LIMIT ?3";
