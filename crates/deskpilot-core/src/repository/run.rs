//! Autonomy run repository trait definition.

use deskpilot_types::error::RepositoryError;
use deskpilot_types::run::RunRecord;
use uuid::Uuid;

/// Storage port for run record snapshots.
pub trait RunRepository: Send + Sync {
    /// Insert or replace a run snapshot by id.
    fn upsert_run(
        &self,
        run: &RunRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_run(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RunRecord>, RepositoryError>> + Send;

    /// All stored runs ordered by start time, oldest first.
    fn load_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RunRecord>, RepositoryError>> + Send;

    fn delete_run(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
