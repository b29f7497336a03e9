//! Alert repository implementation using SQLite
//!
//! A partial unique index keeps at most one open alert per
//! (integration, kind); resolved alerts are kept as history.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerlink_core::{AlertFilter, AlertRepository};
use ledgerlink_domain::{Alert, AlertKind, Result as DomainResult};
use rusqlite::{params, Row};
use tokio::task;
use uuid::Uuid;

use super::codec::{millis_to_ts, opt_millis_to_ts, opt_ts_to_millis, parse_label, parse_uuid, ts_to_millis};
use super::manager::DbManager;
use crate::errors::{map_join_error, map_sql_error};

/// SQLite-backed implementation of `AlertRepository`
pub struct SqliteAlertRepository {
    db: Arc<DbManager>,
}

impl SqliteAlertRepository {
    /// Create a new repository instance
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn open_if_absent(&self, alert: &Alert) -> DomainResult<bool> {
        let db = Arc::clone(&self.db);
        let alert = alert.clone();

        task::spawn_blocking(move || -> DomainResult<bool> {
            let conn = db.get_connection()?;
            let inserted = conn
                .execute(
                    INSERT_OR_IGNORE_SQL,
                    params![
                        alert.id.to_string(),
                        alert.integration_id.to_string(),
                        alert.kind.to_string(),
                        alert.severity.to_string(),
                        alert.detail,
                        ts_to_millis(alert.opened_at),
                        opt_ts_to_millis(alert.resolved_at),
                    ],
                )
                .map_err(map_sql_error)?;
            Ok(inserted == 1)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn resolve(
        &self,
        integration_id: Uuid,
        kind: AlertKind,
        at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<bool> {
            let conn = db.get_connection()?;
            let changed = conn
                .execute(
                    RESOLVE_SQL,
                    params![integration_id.to_string(), kind.to_string(), ts_to_millis(at)],
                )
                .map_err(map_sql_error)?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn open_for(&self, integration_id: Uuid) -> DomainResult<Vec<Alert>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<Alert>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(OPEN_FOR_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![integration_id.to_string()], map_alert_row)
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self, filter: &AlertFilter) -> DomainResult<Vec<Alert>> {
        let db = Arc::clone(&self.db);
        let filter = filter.clone();

        task::spawn_blocking(move || -> DomainResult<Vec<Alert>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(LIST_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(
                    params![
                        filter.integration_id.map(|id| id.to_string()),
                        i64::from(filter.open_only),
                        i64::from(filter.limit)
                    ],
                    map_alert_row,
                )
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_alert_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        integration_id: parse_uuid(1, &row.get::<_, String>(1)?)?,
        kind: parse_label(2, &row.get::<_, String>(2)?)?,
        severity: parse_label(3, &row.get::<_, String>(3)?)?,
        detail: row.get(4)?,
        opened_at: millis_to_ts(5, row.get(5)?)?,
        resolved_at: opt_millis_to_ts(6, row.get(6)?)?,
    })
}

const INSERT_OR_IGNORE_SQL: &str = "INSERT OR IGNORE INTO alerts (id, integration_id, kind,
        severity, detail, opened_at, resolved_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const RESOLVE_SQL: &str = "UPDATE alerts SET resolved_at = ?3
     WHERE integration_id = ?1 AND kind = ?2 AND resolved_at IS NULL";

const OPEN_FOR_SQL: &str = "SELECT id, integration_id, kind, severity, detail, opened_at,
        resolved_at
     FROM alerts WHERE integration_id = ?1 AND resolved_at IS NULL
     ORDER BY opened_at DESC, id DESC";

const LIST_SQL: &str = "SELECT id, integration_id, kind, severity, detail, opened_at, resolved_at
     FROM alerts
     WHERE (?1 IS NULL OR integration_id = ?1) AND (?2 = 0 OR resolved_at IS NULL)
     ORDER BY opened_at DESC, id DESC
     LIMIT ?3";

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("timestamp")
    }

    fn setup() -> (TempDir, SqliteAlertRepository) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = DbManager::new(temp_dir.path().join("test.db"), 2, Duration::from_secs(1))
            .expect("manager created");
        db.run_migrations().expect("migrations run");
        (temp_dir, SqliteAlertRepository::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn one_open_alert_per_kind() {
        let (_dir, repo) = setup();
        let integration_id = Uuid::now_v7();

        let first = Alert::open(integration_id, AlertKind::BreakerOpen, "breaker opened", at(0));
        assert!(repo.open_if_absent(&first).await.expect("opened"));
        let again = Alert::open(integration_id, AlertKind::BreakerOpen, "still open", at(5));
        assert!(!repo.open_if_absent(&again).await.expect("deduplicated"));

        let other = Alert::open(integration_id, AlertKind::WebhookSignature, "bad signatures", at(6));
        assert!(repo.open_if_absent(&other).await.expect("opened"));

        let open = repo.open_for(integration_id).await.expect("open alerts");
        assert_eq!(open.iter().map(|a| a.kind).collect::<Vec<_>>(), vec![
            AlertKind::WebhookSignature,
            AlertKind::BreakerOpen
        ]);

        assert!(repo.resolve(integration_id, AlertKind::BreakerOpen, at(10)).await.expect("resolved"));
        assert!(!repo.resolve(integration_id, AlertKind::BreakerOpen, at(11)).await.expect("nothing open"));

        // A new episode may open once the previous one is resolved
        let reopened = Alert::open(integration_id, AlertKind::BreakerOpen, "opened again", at(20));
        assert!(repo.open_if_absent(&reopened).await.expect("reopened"));

        let history = repo
            .list(&AlertFilter { integration_id: Some(integration_id), open_only: false, limit: 10 })
            .await
            .expect("history");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, reopened.id);
        assert!(history.iter().any(|a| a.id == first.id && a.resolved_at == Some(at(10))));

        let open_only = repo
            .list(&AlertFilter { integration_id: None, open_only: true, limit: 10 })
            .await
            .expect("open");
        assert_eq!(open_only.len(), 2);
    }
}
