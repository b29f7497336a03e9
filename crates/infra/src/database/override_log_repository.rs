//! Override/audit log repository implementation using SQLite
//!
//! Rows are append-only; triggers in the schema abort any UPDATE or DELETE.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_core::OverrideLogRepository;
use ledgerlink_domain::{
    OverrideAction, OverrideEntry, OverrideFilter, OverrideTarget, Result as DomainResult,
};
use rusqlite::types::Type;
use rusqlite::{params, Row};
use tokio::task;
use uuid::Uuid;

use super::codec::{i64_to_u64, millis_to_ts, opt_ts_to_millis, parse_json, parse_label, parse_uuid, to_json, ts_to_millis};
use super::manager::DbManager;
use crate::errors::{map_join_error, map_sql_error};

/// SQLite-backed implementation of `OverrideLogRepository`
pub struct SqliteOverrideLogRepository {
    db: Arc<DbManager>,
}

impl SqliteOverrideLogRepository {
    /// Create a new repository instance
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OverrideLogRepository for SqliteOverrideLogRepository {
    async fn append(&self, entry: &OverrideEntry) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let entry = entry.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let details = to_json(&entry.details)?;
            conn.execute(
                INSERT_SQL,
                params![
                    entry.id.to_string(),
                    entry.actor,
                    entry.action.to_string(),
                    entry.target.kind(),
                    entry.target.id().to_string(),
                    entry.integration_id.to_string(),
                    entry.business_id,
                    entry.reason,
                    details,
                    ts_to_millis(entry.created_at),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn recent(&self, filter: &OverrideFilter) -> DomainResult<Vec<OverrideEntry>> {
        let db = Arc::clone(&self.db);
        let filter = filter.clone();

        task::spawn_blocking(move || -> DomainResult<Vec<OverrideEntry>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(RECENT_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(
                    params![
                        filter.integration_id.map(|id| id.to_string()),
                        filter.business_id,
                        opt_ts_to_millis(filter.since),
                        i64::from(filter.effective_limit())
                    ],
                    map_entry_row,
                )
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn count_since(&self, integration_id: Uuid, since: DateTime<Utc>) -> DomainResult<u64> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<u64> {
            let conn = db.get_connection()?;
            let count: i64 = conn
                .query_row(
                    COUNT_SINCE_SQL,
                    params![integration_id.to_string(), ts_to_millis(since)],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(i64_to_u64(count))
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_entry_row(row: &Row<'_>) -> rusqlite::Result<OverrideEntry> {
    let action: OverrideAction = parse_label(2, &row.get::<_, String>(2)?)?;
    let target_kind: String = row.get(3)?;
    let target_id = parse_uuid(4, &row.get::<_, String>(4)?)?;
    let target = match target_kind.as_str() {
        "transaction" => OverrideTarget::Transaction(target_id),
        "integration" => OverrideTarget::Integration(target_id),
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("unknown override target kind: {other}").into(),
            ))
        }
    };

    Ok(OverrideEntry {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        actor: row.get(1)?,
        action,
        target,
        integration_id: parse_uuid(5, &row.get::<_, String>(5)?)?,
        business_id: row.get(6)?,
        reason: row.get(7)?,
        details: parse_json(8, &row.get::<_, String>(8)?)?,
        created_at: millis_to_ts(9, row.get(9)?)?,
    })
}

const INSERT_SQL: &str = "INSERT INTO override_log (id, actor, action, target_kind, target_id,
        integration_id, business_id, reason, details, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

// `seq` breaks ties between entries written in the same millisecond
const RECENT_SQL: &str = "SELECT id, actor, action, target_kind, target_id, integration_id,
        business_id, reason, details, created_at
     FROM override_log
     WHERE (?1 IS NULL OR integration_id = ?1)
       AND (?2 IS NULL OR business_id = ?2)
       AND (?3 IS NULL OR created_at >= ?3)
     ORDER BY created_at DESC, seq DESC
     LIMIT ?4";

const COUNT_SINCE_SQL: &str =
    "SELECT COUNT(*) FROM override_log WHERE integration_id = ?1 AND created_at >= ?2";
