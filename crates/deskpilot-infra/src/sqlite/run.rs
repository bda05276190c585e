//! SQLite autonomy run repository implementation.
//!
//! Mirrors the task repository: JSON snapshots keyed by id, newest-N
//! retention applied on upsert, hydration loads ordered by start time.

use deskpilot_core::repository::RunRepository;
use deskpilot_types::error::RepositoryError;
use deskpilot_types::run::RunRecord;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{decode_record, status_tag};

/// SQLite-backed implementation of `RunRepository`.
pub struct SqliteRunRepository {
    pool: DatabasePool,
    max_records: u32,
}

impl SqliteRunRepository {
    pub fn new(pool: DatabasePool, max_records: u32) -> Self {
        Self { pool, max_records }
    }

    async fn apply_retention(&self) -> Result<(), RepositoryError> {
        if self.max_records == 0 {
            return Ok(());
        }
        sqlx::query(
            "DELETE FROM autonomy_runs WHERE id IN (
                SELECT id FROM autonomy_runs ORDER BY started_at DESC
                LIMIT -1 OFFSET ?
            )",
        )
        .bind(self.max_records as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }
}

impl RunRepository for SqliteRunRepository {
    async fn upsert_run(&self, run: &RunRecord) -> Result<(), RepositoryError> {
        let record = serde_json::to_string(run)
            .map_err(|e| RepositoryError::Decode(format!("run encode failed: {e}")))?;
        sqlx::query(
            "INSERT INTO autonomy_runs (id, status, record, started_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 record = excluded.record,
                 updated_at = excluded.updated_at",
        )
        .bind(run.run_id.to_string())
        .bind(status_tag(&run.status)?)
        .bind(record)
        .bind(run.started_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        self.apply_retention().await
    }

    async fn get_run(&self, id: &Uuid) -> Result<Option<RunRecord>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM autonomy_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        row.map(|row| {
            let record: String = row
                .try_get("record")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            decode_record(&record, "run")
        })
        .transpose()
    }

    async fn load_runs(&self) -> Result<Vec<RunRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT record FROM autonomy_runs ORDER BY started_at ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                let record: String = row
                    .try_get("record")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                decode_record(&record, "run")
            })
            .collect()
    }

    async fn delete_run(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM autonomy_runs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deskpilot_types::run::{AutonomyLevel, RunStatus};

    fn sample_run(objective: &str, offset_secs: i64) -> RunRecord {
        let now = Utc::now() + chrono::Duration::seconds(offset_secs);
        RunRecord {
            run_id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            objective: objective.to_string(),
            planner_mode: "deterministic".to_string(),
            status: RunStatus::Running,
            iteration: 0,
            max_iterations: 10,
            autonomy: AutonomyLevel::Supervised,
            auto_approve_irreversible: false,
            approval_token: None,
            last_error: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
            agent_log: Vec::new(),
        }
    }

    async fn repo(max_records: u32) -> (SqliteRunRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("r.db").display());
        let pool = DatabasePool::from_url(&url).await.unwrap();
        (SqliteRunRepository::new(pool, max_records), dir)
    }

    #[tokio::test]
    async fn upsert_and_load_roundtrip() {
        let (repo, _dir) = repo(100).await;
        let mut run = sample_run("persist run", 0);
        repo.upsert_run(&run).await.unwrap();

        run.status = RunStatus::Completed;
        run.iteration = 3;
        repo.upsert_run(&run).await.unwrap();

        let loaded = repo.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.iteration, 3);
        assert_eq!(repo.load_runs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_orders_by_start_time() {
        let (repo, _dir) = repo(100).await;
        repo.upsert_run(&sample_run("newer", 60)).await.unwrap();
        repo.upsert_run(&sample_run("older", -60)).await.unwrap();

        let loaded = repo.load_runs().await.unwrap();
        assert_eq!(loaded[0].objective, "older");
        assert_eq!(loaded[1].objective, "newer");
    }

    #[tokio::test]
    async fn retention_keeps_newest_runs() {
        let (repo, _dir) = repo(2).await;
        for i in 0..5 {
            repo.upsert_run(&sample_run(&format!("run-{i}"), i))
                .await
                .unwrap();
        }
        let remaining = repo.load_runs().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].objective, "run-3");
        assert_eq!(remaining[1].objective, "run-4");
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let (repo, _dir) = repo(100).await;
        let run = sample_run("delete", 0);
        repo.upsert_run(&run).await.unwrap();
        assert!(repo.delete_run(&run.run_id).await.unwrap());
        assert!(!repo.delete_run(&run.run_id).await.unwrap());
    }
}
