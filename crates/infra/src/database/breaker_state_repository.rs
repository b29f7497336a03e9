//! Circuit breaker snapshot repository implementation using SQLite

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ledgerlink_common::BreakerSnapshot;
use ledgerlink_core::BreakerStateRepository;
use ledgerlink_domain::Result as DomainResult;
use rusqlite::{params, OptionalExtension};
use tokio::task;
use uuid::Uuid;

use super::codec::{parse_json, to_json, ts_to_millis};
use super::manager::DbManager;
use crate::errors::{map_join_error, map_sql_error};

/// SQLite-backed implementation of `BreakerStateRepository`
pub struct SqliteBreakerStateRepository {
    db: Arc<DbManager>,
}

impl SqliteBreakerStateRepository {
    /// Create a new repository instance
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BreakerStateRepository for SqliteBreakerStateRepository {
    async fn load(&self, integration_id: Uuid) -> DomainResult<Option<BreakerSnapshot>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Option<BreakerSnapshot>> {
            let conn = db.get_connection()?;
            conn.query_row(SELECT_SQL, params![integration_id.to_string()], |row| {
                parse_json(0, &row.get::<_, String>(0)?)
            })
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn save(&self, integration_id: Uuid, snapshot: &BreakerSnapshot) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let encoded = to_json(snapshot)?;

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute(
                UPSERT_SQL,
                params![integration_id.to_string(), encoded, ts_to_millis(Utc::now())],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

const SELECT_SQL: &str = "SELECT snapshot FROM breaker_state WHERE integration_id = ?1";

const UPSERT_SQL: &str = "INSERT INTO breaker_state (integration_id, snapshot, updated_at)
     VALUES (?1, ?2, ?3)
     ON CONFLICT(integration_id) DO UPDATE SET
        snapshot = excluded.snapshot,
        updated_at = excluded.updated_at";

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::DateTime;
    use ledgerlink_common::CircuitState;
    use tempfile::TempDir;

    use super::*;

    fn snapshot(state: CircuitState, outcomes: Vec<bool>) -> BreakerSnapshot {
        let failure_count = u32::try_from(outcomes.iter().filter(|ok| !**ok).count()).expect("small");
        let success_count = u32::try_from(outcomes.len()).expect("small") - failure_count;
        BreakerSnapshot {
            state,
            recent_outcomes: outcomes,
            failure_count,
            success_count,
            cooldown_level: 1,
            cooldown_ms: 30_000,
            opened_at: DateTime::from_timestamp(1_700_000_000, 0),
            last_transition_at: DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp"),
            total_calls: 10,
            rejected_calls: 2,
        }
    }

    #[tokio::test]
    async fn save_overwrites_previous_snapshot() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = DbManager::new(temp_dir.path().join("test.db"), 2, Duration::from_secs(1))
            .expect("manager created");
        db.run_migrations().expect("migrations run");
        let repo = SqliteBreakerStateRepository::new(Arc::new(db));
        let integration_id = Uuid::now_v7();

        assert!(repo.load(integration_id).await.expect("load").is_none());

        let open = snapshot(CircuitState::Open, vec![false, false, true]);
        repo.save(integration_id, &open).await.expect("saved");
        assert_eq!(repo.load(integration_id).await.expect("load"), Some(open));

        let closed = snapshot(CircuitState::Closed, vec![true]);
        repo.save(integration_id, &closed).await.expect("saved");
        assert_eq!(repo.load(integration_id).await.expect("load"), Some(closed));
    }
}
