//! Provider ledger repository implementation using SQLite

use std::sync::Arc;

use async_trait::async_trait;
use ledgerlink_core::LedgerRepository;
use ledgerlink_domain::{ProviderLedgerEntry, Result as DomainResult};
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;
use uuid::Uuid;

use super::codec::{
    millis_to_ts, parse_json, parse_label, parse_opt_uuid, parse_uuid, to_json, ts_to_millis,
};
use super::manager::DbManager;
use crate::errors::{map_join_error, map_sql_error};

/// SQLite-backed implementation of `LedgerRepository`
pub struct SqliteLedgerRepository {
    db: Arc<DbManager>,
}

impl SqliteLedgerRepository {
    /// Create a new repository instance
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LedgerRepository for SqliteLedgerRepository {
    async fn find(
        &self,
        integration_id: Uuid,
        provider_txn_id: &str,
    ) -> DomainResult<Option<ProviderLedgerEntry>> {
        let db = Arc::clone(&self.db);
        let provider_txn_id = provider_txn_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<ProviderLedgerEntry>> {
            let conn = db.get_connection()?;
            conn.query_row(
                SELECT_ONE_SQL,
                params![integration_id.to_string(), provider_txn_id],
                map_entry_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn upsert(&self, entry: &ProviderLedgerEntry) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let entry = entry.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let candidate_ids = to_json(&entry.candidate_ids)?;
            conn.execute(
                UPSERT_SQL,
                params![
                    entry.id.to_string(),
                    entry.integration_id.to_string(),
                    entry.provider.to_string(),
                    entry.provider_txn_id,
                    entry.outcome.to_string(),
                    entry.record_id.map(|id| id.to_string()),
                    candidate_ids,
                    entry.amount_minor,
                    entry.currency,
                    ts_to_millis(entry.occurred_at),
                    entry.payload_hash,
                    ts_to_millis(entry.recorded_at),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self, integration_id: Uuid, limit: u32) -> DomainResult<Vec<ProviderLedgerEntry>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<ProviderLedgerEntry>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(LIST_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![integration_id.to_string(), i64::from(limit)], map_entry_row)
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_entry_row(row: &Row<'_>) -> rusqlite::Result<ProviderLedgerEntry> {
    Ok(ProviderLedgerEntry {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        integration_id: parse_uuid(1, &row.get::<_, String>(1)?)?,
        provider: parse_label(2, &row.get::<_, String>(2)?)?,
        provider_txn_id: row.get(3)?,
        outcome: parse_label(4, &row.get::<_, String>(4)?)?,
        record_id: parse_opt_uuid(5, row.get(5)?)?,
        candidate_ids: parse_json(6, &row.get::<_, String>(6)?)?,
        amount_minor: row.get(7)?,
        currency: row.get(8)?,
        occurred_at: millis_to_ts(9, row.get(9)?)?,
        payload_hash: row.get(10)?,
        recorded_at: millis_to_ts(11, row.get(11)?)?,
    })
}

const SELECT_ONE_SQL: &str = "SELECT id, integration_id, provider, provider_txn_id, outcome,
        record_id, candidate_ids, amount_minor, currency, occurred_at, payload_hash, recorded_at
     FROM provider_ledger WHERE integration_id = ?1 AND provider_txn_id = ?2";

// Reclassification keeps the row id of the first classification
const UPSERT_SQL: &str = "INSERT INTO provider_ledger (id, integration_id, provider,
        provider_txn_id, outcome, record_id, candidate_ids, amount_minor, currency, occurred_at,
        payload_hash, recorded_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
     ON CONFLICT(integration_id, provider_txn_id) DO UPDATE SET
        outcome = excluded.outcome,
        record_id = excluded.record_id,
        candidate_ids = excluded.candidate_ids,
        amount_minor = excluded.amount_minor,
        currency = excluded.currency,
        occurred_at = excluded.occurred_at,
        payload_hash = excluded.payload_hash,
        recorded_at = excluded.recorded_at";

const LIST_SQL: &str = "SELECT id, integration_id, provider, provider_txn_id, outcome,
        record_id, candidate_ids, amount_minor, currency, occurred_at, payload_hash, recorded_at
     FROM provider_ledger WHERE integration_id = ?1
     ORDER BY recorded_at DESC, id DESC
     LIMIT ?2";
