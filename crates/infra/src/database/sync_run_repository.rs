//! Sync run history repository implementation using SQLite

use std::sync::Arc;

use async_trait::async_trait;
use ledgerlink_core::SyncRunRepository;
use ledgerlink_domain::{Result as DomainResult, SyncRun};
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;
use uuid::Uuid;

use super::codec::{
    millis_to_ts, parse_json, parse_label, parse_opt_json, parse_opt_uuid, parse_uuid, to_json,
    to_opt_json, ts_to_millis,
};
use super::manager::DbManager;
use crate::errors::{map_join_error, map_sql_error};

/// SQLite-backed implementation of `SyncRunRepository`
pub struct SqliteSyncRunRepository {
    db: Arc<DbManager>,
}

impl SqliteSyncRunRepository {
    /// Create a new repository instance
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncRunRepository for SqliteSyncRunRepository {
    async fn record(&self, run: &SyncRun) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let run = run.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let mode = to_json(&run.mode)?;
            let counts = to_json(&run.counts)?;
            let cursor_before = to_opt_json(run.cursor_before.as_ref())?;
            let cursor_after = to_opt_json(run.cursor_after.as_ref())?;

            conn.execute(
                INSERT_SQL,
                params![
                    run.operation_id.to_string(),
                    run.integration_id.to_string(),
                    run.trigger.to_string(),
                    mode,
                    run.priority.to_string(),
                    run.outcome.to_string(),
                    counts,
                    cursor_before,
                    cursor_after,
                    ts_to_millis(run.started_at),
                    ts_to_millis(run.finished_at),
                    run.error_kind.map(|k| k.to_string()),
                    run.error,
                    run.coalesced_into.map(|id| id.to_string()),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn latest(&self, integration_id: Uuid) -> DomainResult<Option<SyncRun>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Option<SyncRun>> {
            let conn = db.get_connection()?;
            conn.query_row(LATEST_SQL, params![integration_id.to_string()], map_run_row)
                .optional()
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self, integration_id: Uuid, limit: u32) -> DomainResult<Vec<SyncRun>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<SyncRun>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(LIST_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![integration_id.to_string(), i64::from(limit)], map_run_row)
                .map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_run_row(row: &Row<'_>) -> rusqlite::Result<SyncRun> {
    let error_kind: Option<String> = row.get(11)?;

    Ok(SyncRun {
        operation_id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        integration_id: parse_uuid(1, &row.get::<_, String>(1)?)?,
        trigger: parse_label(2, &row.get::<_, String>(2)?)?,
        mode: parse_json(3, &row.get::<_, String>(3)?)?,
        priority: parse_label(4, &row.get::<_, String>(4)?)?,
        outcome: parse_label(5, &row.get::<_, String>(5)?)?,
        counts: parse_json(6, &row.get::<_, String>(6)?)?,
        cursor_before: parse_opt_json(7, row.get(7)?)?,
        cursor_after: parse_opt_json(8, row.get(8)?)?,
        started_at: millis_to_ts(9, row.get(9)?)?,
        finished_at: millis_to_ts(10, row.get(10)?)?,
        error_kind: error_kind.as_deref().map(|k| parse_label(11, k)).transpose()?,
        error: row.get(12)?,
        coalesced_into: parse_opt_uuid(13, row.get(13)?)?,
    })
}

const INSERT_SQL: &str = "INSERT INTO sync_runs (operation_id, integration_id, trigger, mode,
        priority, outcome, counts, cursor_before, cursor_after, started_at, finished_at,
        error_kind, error, coalesced_into)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

// Newest by finish time: a coalesced request never hides the run that absorbed it
const LATEST_SQL: &str = "SELECT operation_id, integration_id, trigger, mode, priority, outcome,
        counts, cursor_before, cursor_after, started_at, finished_at, error_kind, error,
        coalesced_into
     FROM sync_runs WHERE integration_id = ?1
     ORDER BY finished_at DESC, operation_id DESC
     LIMIT 1";

const LIST_SQL: &str = "SELECT operation_id, integration_id, trigger, mode, priority, outcome,
        counts, cursor_before, cursor_after, started_at, finished_at, error_kind, error,
        coalesced_into
     FROM sync_runs WHERE integration_id = ?1
     ORDER BY finished_at DESC, operation_id DESC
     LIMIT ?2";

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use ledgerlink_domain::{
        ErrorKind, LedgerLinkError, SyncCursor, SyncMode, SyncOutcome, SyncPriority, SyncRequest,
        SyncTrigger,
    };
    use tempfile::TempDir;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("timestamp")
    }

    fn setup() -> (TempDir, SqliteSyncRunRepository) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = DbManager::new(temp_dir.path().join("test.db"), 2, Duration::from_secs(1))
            .expect("manager created");
        db.run_migrations().expect("migrations run");
        (temp_dir, SqliteSyncRunRepository::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn runs_roundtrip_and_latest_is_by_finish_time() {
        let (_dir, repo) = setup();
        let integration_id = Uuid::now_v7();

        let request = SyncRequest::new(
            integration_id,
            SyncTrigger::Manual,
            SyncMode::CustomRange { from: at(0), to: at(60) },
            SyncPriority::High,
        );
        let mut completed = SyncRun::begin(&request, Some(SyncCursor::new(at(0))), at(100));
        completed.counts.matched = 3;
        completed.cursor_after = Some(SyncCursor::new(at(50)).with_token("next"));

        // Folded into `completed` while it was still running
        let coalesced = SyncRun::begin(&SyncRequest::scheduled(integration_id), None, at(110))
            .coalesce(completed.operation_id, at(110));
        repo.record(&coalesced).await.expect("recorded");

        let completed = completed.finish(SyncOutcome::Completed, at(150));
        repo.record(&completed).await.expect("recorded");
        assert_eq!(repo.latest(integration_id).await.expect("query"), Some(completed.clone()));

        let failed = SyncRun::begin(&SyncRequest::scheduled(integration_id), None, at(200))
            .fail(&LedgerLinkError::Authentication("401".into()), at(201));
        repo.record(&failed).await.expect("recorded");

        let latest = repo.latest(integration_id).await.expect("query").expect("present");
        assert_eq!(latest, failed);
        assert_eq!(latest.error_kind, Some(ErrorKind::Authentication));

        let listed = repo.list(integration_id, 10).await.expect("listed");
        assert_eq!(listed[2].coalesced_into, Some(completed.operation_id));
        assert_eq!(listed, vec![failed, completed, coalesced]);

        assert!(repo.latest(Uuid::now_v7()).await.expect("query").is_none());
    }
}
