//! Integration repository implementation using SQLite
//!
//! The cursor is split into a watermark column (ordered) and an opaque token
//! column so that it can be inspected with plain SQL.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_core::IntegrationRepository;
use ledgerlink_domain::{
    Integration, IntegrationStatus, LedgerLinkError, Result as DomainResult, SyncCursor,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;
use uuid::Uuid;

use super::codec::{
    bool_to_int, i64_to_u64, int_to_bool, millis_to_ts, opt_millis_to_ts, opt_ts_to_millis, parse_json,
    parse_label, parse_uuid, to_json, ts_to_millis, u64_to_i64,
};
use super::manager::DbManager;
use crate::errors::{map_join_error, map_sql_error};

/// SQLite-backed implementation of `IntegrationRepository`
pub struct SqliteIntegrationRepository {
    db: Arc<DbManager>,
}

impl SqliteIntegrationRepository {
    /// Create a new repository instance
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IntegrationRepository for SqliteIntegrationRepository {
    async fn get(&self, id: Uuid) -> DomainResult<Option<Integration>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Option<Integration>> {
            let conn = db.get_connection()?;
            conn.query_row(SELECT_BY_ID_SQL, params![id.to_string()], map_integration_row)
                .optional()
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self) -> DomainResult<Vec<Integration>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<Integration>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(SELECT_ALL_SQL).map_err(map_sql_error)?;
            let rows = stmt.query_map([], map_integration_row).map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn insert(&self, integration: &Integration) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let integration = integration.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            insert_integration(&conn, &integration)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn save(&self, integration: &Integration) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let integration = integration.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let retry_policy = to_json(&integration.retry_policy)?;
            let changed = conn
                .execute(
                    UPDATE_CONFIG_SQL,
                    params![
                        integration.id.to_string(),
                        integration.credential_ref,
                        u64_to_i64(integration.sync_interval_secs),
                        retry_policy,
                        bool_to_int(integration.enabled),
                        integration.status.to_string(),
                        ts_to_millis(integration.updated_at),
                    ],
                )
                .map_err(map_sql_error)?;
            ensure_found(changed, integration.id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn update_cursor(
        &self,
        id: Uuid,
        cursor: &SyncCursor,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let cursor = cursor.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    UPDATE_CURSOR_SQL,
                    params![
                        id.to_string(),
                        ts_to_millis(cursor.watermark),
                        cursor.token,
                        ts_to_millis(at)
                    ],
                )
                .map_err(map_sql_error)?;
            ensure_found(changed, id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    UPDATE_STATUS_SQL,
                    params![id.to_string(), status.to_string(), ts_to_millis(at)],
                )
                .map_err(map_sql_error)?;
            ensure_found(changed, id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> DomainResult<()> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(MARK_SYNCED_SQL, params![id.to_string(), ts_to_millis(at)])
                .map_err(map_sql_error)?;
            ensure_found(changed, id)
        })
        .await
        .map_err(map_join_error)?
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn insert_integration(conn: &Connection, integration: &Integration) -> DomainResult<()> {
    let retry_policy = to_json(&integration.retry_policy)?;
    let (watermark, token) = match &integration.cursor {
        Some(cursor) => (Some(ts_to_millis(cursor.watermark)), cursor.token.clone()),
        None => (None, None),
    };

    conn.execute(
        INSERT_SQL,
        params![
            integration.id.to_string(),
            integration.business_id,
            integration.provider.to_string(),
            integration.credential_ref,
            watermark,
            token,
            u64_to_i64(integration.sync_interval_secs),
            retry_policy,
            bool_to_int(integration.enabled),
            integration.status.to_string(),
            opt_ts_to_millis(integration.last_synced_at),
            ts_to_millis(integration.created_at),
            ts_to_millis(integration.updated_at),
        ],
    )
    .map_err(|err| match map_sql_error(err) {
        LedgerLinkError::Validation(_) => {
            LedgerLinkError::Validation(format!("integration {} already exists", integration.id))
        }
        other => other,
    })?;
    Ok(())
}

fn ensure_found(changed: usize, id: Uuid) -> DomainResult<()> {
    if changed == 0 {
        Err(LedgerLinkError::not_found(format!("integration {id}")))
    } else {
        Ok(())
    }
}

fn map_integration_row(row: &Row<'_>) -> rusqlite::Result<Integration> {
    let watermark = opt_millis_to_ts(4, row.get(4)?)?;
    let token: Option<String> = row.get(5)?;
    let cursor = watermark.map(|watermark| SyncCursor { watermark, token });

    Ok(Integration {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        business_id: row.get(1)?,
        provider: parse_label(2, &row.get::<_, String>(2)?)?,
        credential_ref: row.get(3)?,
        cursor,
        sync_interval_secs: i64_to_u64(row.get(6)?),
        retry_policy: parse_json(7, &row.get::<_, String>(7)?)?,
        enabled: int_to_bool(row.get(8)?),
        status: parse_label(9, &row.get::<_, String>(9)?)?,
        last_synced_at: opt_millis_to_ts(10, row.get(10)?)?,
        created_at: millis_to_ts(11, row.get(11)?)?,
        updated_at: millis_to_ts(12, row.get(12)?)?,
    })
}

const SELECT_BY_ID_SQL: &str = "SELECT id, business_id, provider, credential_ref, cursor_watermark, cursor_token,
        sync_interval_secs, retry_policy, enabled, status, last_synced_at, created_at, updated_at
     FROM integrations WHERE id = ?1";

const SELECT_ALL_SQL: &str = "SELECT id, business_id, provider, credential_ref, cursor_watermark, cursor_token,
        sync_interval_secs, retry_policy, enabled, status, last_synced_at, created_at, updated_at
     FROM integrations ORDER BY created_at ASC, id ASC";

const INSERT_SQL: &str = "INSERT INTO integrations (id, business_id, provider, credential_ref,
        cursor_watermark, cursor_token, sync_interval_secs, retry_policy, enabled, status,
        last_synced_at, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const UPDATE_CONFIG_SQL: &str = "UPDATE integrations
     SET credential_ref = ?2, sync_interval_secs = ?3, retry_policy = ?4, enabled = ?5,
         status = ?6, updated_at = ?7
     WHERE id = ?1";

const UPDATE_CURSOR_SQL: &str = "UPDATE integrations
     SET cursor_watermark = ?2, cursor_token = ?3, updated_at = ?4
     WHERE id = ?1";

const UPDATE_STATUS_SQL: &str =
    "UPDATE integrations SET status = ?2, updated_at = ?3 WHERE id = ?1";

const MARK_SYNCED_SQL: &str = "UPDATE integrations SET last_synced_at = ?2 WHERE id = ?1";

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ledgerlink_domain::{Provider, RetryPolicy};
    use tempfile::TempDir;

    use super::*;

    fn setup() -> (TempDir, SqliteIntegrationRepository) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = DbManager::new(temp_dir.path().join("test.db"), 2, Duration::from_secs(1))
            .expect("manager created");
        db.run_migrations().expect("migrations run");
        (temp_dir, SqliteIntegrationRepository::new(Arc::new(db)))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("timestamp")
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips_every_field() {
        let (_dir, repo) = setup();
        let mut integration = Integration::new("biz-1", Provider::Shopify, "env:SHOPIFY", at(0));
        integration.cursor = Some(SyncCursor::new(at(5)).with_token("page-2"));
        integration.retry_policy =
            RetryPolicy { max_attempts: 7, initial_backoff_ms: 10, multiplier: 3.0, max_backoff_ms: 90 };

        repo.insert(&integration).await.expect("inserted");
        let loaded = repo.get(integration.id).await.expect("query").expect("present");
        assert_eq!(loaded, integration);

        assert!(repo.get(Uuid::now_v7()).await.expect("query").is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let (_dir, repo) = setup();
        let integration = Integration::new("biz-1", Provider::Square, "env:SQ", at(0));
        repo.insert(&integration).await.expect("inserted");

        let err = repo.insert(&integration).await.expect_err("duplicate id");
        assert!(matches!(err, LedgerLinkError::Validation(msg) if msg.contains("already exists")));
    }

    #[tokio::test]
    async fn list_orders_by_creation() {
        let (_dir, repo) = setup();
        let later = Integration::new("biz-2", Provider::Zettle, "env:Z", at(10));
        let earlier = Integration::new("biz-1", Provider::Square, "env:SQ", at(0));
        repo.insert(&later).await.expect("inserted");
        repo.insert(&earlier).await.expect("inserted");

        let ids: Vec<_> = repo.list().await.expect("listed").into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![earlier.id, later.id]);
    }

    #[tokio::test]
    async fn updates_touch_only_their_columns() {
        let (_dir, repo) = setup();
        let mut integration = Integration::new("biz-1", Provider::Square, "env:SQ", at(0));
        repo.insert(&integration).await.expect("inserted");

        repo.update_cursor(integration.id, &SyncCursor::new(at(30)), at(31)).await.expect("cursor");
        repo.set_status(integration.id, IntegrationStatus::NeedsReauth, at(32)).await.expect("status");
        repo.mark_synced(integration.id, at(33)).await.expect("synced");

        integration.credential_ref = "env:SQ_ROTATED".into();
        integration.enabled = false;
        integration.status = IntegrationStatus::Active;
        integration.updated_at = at(40);
        repo.save(&integration).await.expect("saved");

        let loaded = repo.get(integration.id).await.expect("query").expect("present");
        assert_eq!(loaded.cursor, Some(SyncCursor::new(at(30))));
        assert_eq!(loaded.last_synced_at, Some(at(33)));
        assert_eq!(loaded.credential_ref, "env:SQ_ROTATED");
        assert!(!loaded.enabled);
        assert_eq!(loaded.status, IntegrationStatus::Active);
        assert_eq!(loaded.updated_at, at(40));
    }

    #[tokio::test]
    async fn updates_on_missing_integration_are_not_found() {
        let (_dir, repo) = setup();
        let err = repo.mark_synced(Uuid::now_v7(), at(0)).await.expect_err("missing");
        assert!(matches!(err, LedgerLinkError::NotFound(_)));
    }
}
