//! Application state wiring all services together.
//!
//! The composition root: builds the database pool, repositories, state
//! store, command bridge, broadcast hub, executor, orchestrator, and runner,
//! and hydrates durable state before the HTTP surface accepts traffic. The
//! original module-level singletons live here as owned fields instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deskpilot_core::autonomy::{AutonomyRunner, run_update_callback};
use deskpilot_core::bridge::CommandBridge;
use deskpilot_core::executor::build_action_executor;
use deskpilot_core::hub::BroadcastHub;
use deskpilot_core::orchestrator::{TaskOrchestrator, task_update_callback};
use deskpilot_core::planner::{BoxPlanner, DeterministicPlanner};
use deskpilot_core::repository::{EventRepository, RunRepository, TaskRepository};
use deskpilot_core::state_store::StateStore;
use deskpilot_infra::config::load_config;
use deskpilot_infra::sqlite::event::SqliteEventRepository;
use deskpilot_infra::sqlite::pool::DatabasePool;
use deskpilot_infra::sqlite::run::SqliteRunRepository;
use deskpilot_infra::sqlite::task::SqliteTaskRepository;
use deskpilot_types::config::RunControlConfig;

/// Shared application state holding all services.
#[derive(Clone)]
pub struct AppState {
    pub config: RunControlConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    pub state_store: Arc<StateStore>,
    pub bridge: Arc<CommandBridge>,
    pub hub: Arc<BroadcastHub>,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub runner: Arc<AutonomyRunner>,
    pub event_repo: Arc<SqliteEventRepository>,
}

impl AppState {
    /// Initialize the application state: connect to the database, wire
    /// services, and hydrate durable state.
    pub async fn init(data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;
        let config = load_config(&data_dir).await;

        let db_pool = DatabasePool::open(&config, &data_dir).await?;
        let task_repo = Arc::new(SqliteTaskRepository::new(
            db_pool.clone(),
            config.db_max_task_records,
        ));
        let run_repo = Arc::new(SqliteRunRepository::new(
            db_pool.clone(),
            config.db_max_autonomy_runs,
        ));
        let event_repo = Arc::new(SqliteEventRepository::new(
            db_pool.clone(),
            config.db_max_events,
        ));

        let state_store = Arc::new(StateStore::new(config.observation_ring_size));
        match event_repo.load_snapshot(config.observation_ring_size).await {
            Ok(snapshot) => {
                state_store
                    .hydrate(
                        snapshot.current,
                        snapshot.events,
                        snapshot.idle,
                        snapshot.idle_since,
                    )
                    .await;
            }
            Err(err) => tracing::warn!(error = %err, "failed to hydrate desktop state"),
        }

        let bridge = Arc::new(CommandBridge::new(Duration::from_millis(
            config.executor_bridge_timeout_ms,
        )));
        let hub = Arc::new(BroadcastHub::new(
            config.broadcast_max_connections,
            Duration::from_millis(config.broadcast_send_timeout_ms),
        ));

        let executor = build_action_executor(&config, Some(bridge.clone()))?;

        // Persist every task transition; failures are logged and retried on
        // the next update.
        let persist_tasks = task_repo.clone();
        let on_task_update = task_update_callback(move |task| {
            let repo = persist_tasks.clone();
            async move {
                if let Err(err) = repo.upsert_task(&task).await {
                    tracing::error!(task_id = %task.task_id, error = %err, "failed to persist task update");
                }
            }
        });

        let orchestrator = Arc::new(
            TaskOrchestrator::with_executor(executor)
                .with_update_callback(on_task_update)
                .with_state_store(state_store.clone())
                .with_retry(
                    config.effective_retry_count(),
                    Duration::from_millis(config.executor_retry_delay_ms),
                ),
        );

        // Broadcast run snapshots to subscribers and persist them.
        let hub_for_runs = hub.clone();
        let persist_runs = run_repo.clone();
        let on_run_update = run_update_callback(move |run| {
            let hub = hub_for_runs.clone();
            let repo = persist_runs.clone();
            async move {
                match serde_json::to_value(&run) {
                    Ok(payload) => {
                        hub.broadcast_json(
                            serde_json::json!({"type": "autonomy_run", "run": payload}),
                        )
                        .await;
                    }
                    Err(err) => {
                        tracing::error!(run_id = %run.run_id, error = %err, "failed to encode run update")
                    }
                }
                if let Err(err) = repo.upsert_run(&run).await {
                    tracing::error!(run_id = %run.run_id, error = %err, "failed to persist run update");
                }
            }
        });

        let runner = Arc::new(
            AutonomyRunner::new(orchestrator.clone())
                .with_planner(BoxPlanner::new(DeterministicPlanner))
                .with_update_callback(on_run_update)
                .with_log_cap(config.run_agent_log_cap),
        );

        // Hydrate before any traffic: mid-flight records surface as failed.
        match task_repo.load_tasks().await {
            Ok(tasks) => orchestrator.hydrate_tasks(tasks).await,
            Err(err) => tracing::warn!(error = %err, "failed to hydrate tasks"),
        }
        match run_repo.load_runs().await {
            Ok(runs) => runner.hydrate_runs(runs).await,
            Err(err) => tracing::warn!(error = %err, "failed to hydrate runs"),
        }

        Ok(Self {
            config,
            data_dir,
            db_pool,
            state_store,
            bridge,
            hub,
            orchestrator,
            runner,
            event_repo,
        })
    }

    /// Graceful shutdown: stop workers, then flush pending update jobs.
    pub async fn shutdown(&self) {
        self.runner.shutdown().await;
        if !self
            .orchestrator
            .drain_updates(Some(Duration::from_secs(5)))
            .await
        {
            tracing::warn!("task update jobs still pending at shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_types::run::{RunStatus, StartRunRequest};

    #[tokio::test]
    async fn init_and_restart_hydration_marks_runs_failed() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path().to_path_buf()).await.unwrap();

        // Drive a run to the approval gate and persist via the callback.
        let started = state
            .runner
            .start(StartRunRequest::new(
                "Open outlook, draft reply, then send email",
            ))
            .await
            .unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(1500);
        loop {
            let run = state.runner.get_run(started.run_id).await.unwrap();
            if run.status == RunStatus::WaitingApproval {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "run never reached waiting_approval"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        state.shutdown().await;
        drop(state);

        // A fresh composition over the same data dir hydrates the run as
        // failed with the restart marker.
        let restarted = AppState::init(dir.path().to_path_buf()).await.unwrap();
        let runs = restarted.runner.list_runs(10).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
    }
}
