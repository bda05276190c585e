//! SQLite task repository implementation.
//!
//! Implements `TaskRepository` from `deskpilot-core` using sqlx with split
//! read/write pools. Task records are stored as JSON snapshots; the indexed
//! columns serve ordering and retention only. Retention keeps the newest N
//! records and is applied on every upsert.

use deskpilot_core::repository::TaskRepository;
use deskpilot_types::error::RepositoryError;
use deskpilot_types::task::TaskRecord;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{decode_record, status_tag};

/// SQLite-backed implementation of `TaskRepository`.
pub struct SqliteTaskRepository {
    pool: DatabasePool,
    max_records: u32,
}

impl SqliteTaskRepository {
    /// Repository keeping at most `max_records` task snapshots.
    pub fn new(pool: DatabasePool, max_records: u32) -> Self {
        Self { pool, max_records }
    }

    async fn apply_retention(&self) -> Result<(), RepositoryError> {
        if self.max_records == 0 {
            return Ok(());
        }
        sqlx::query(
            "DELETE FROM tasks WHERE id IN (
                SELECT id FROM tasks ORDER BY created_at DESC
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

impl TaskRepository for SqliteTaskRepository {
    async fn upsert_task(&self, task: &TaskRecord) -> Result<(), RepositoryError> {
        let record = serde_json::to_string(task)
            .map_err(|e| RepositoryError::Decode(format!("task encode failed: {e}")))?;
        sqlx::query(
            "INSERT INTO tasks (id, status, record, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 record = excluded.record,
                 updated_at = excluded.updated_at",
        )
        .bind(task.task_id.to_string())
        .bind(status_tag(&task.status)?)
        .bind(record)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        self.apply_retention().await
    }

    async fn get_task(&self, id: &Uuid) -> Result<Option<TaskRecord>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        row.map(|row| {
            let record: String = row
                .try_get("record")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            decode_record(&record, "task")
        })
        .transpose()
    }

    async fn load_tasks(&self) -> Result<Vec<TaskRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT record FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                let record: String = row
                    .try_get("record")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                decode_record(&record, "task")
            })
            .collect()
    }

    async fn delete_task(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
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
