//! Task repository trait definition.
//!
//! The durable store observes task state through upserted snapshots and
//! replays them at startup for hydration. It never owns live records.
//!
//! Uses native async fn in traits (no async_trait macro).

use deskpilot_types::error::RepositoryError;
use deskpilot_types::task::TaskRecord;
use uuid::Uuid;

/// Storage port for task record snapshots.
pub trait TaskRepository: Send + Sync {
    /// Insert or replace a task snapshot by id.
    fn upsert_task(
        &self,
        task: &TaskRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_task(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<TaskRecord>, RepositoryError>> + Send;

    /// All stored tasks ordered by creation time, oldest first.
    fn load_tasks(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<TaskRecord>, RepositoryError>> + Send;

    fn delete_task(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
