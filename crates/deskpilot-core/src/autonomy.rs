//! Autonomy runner: the outer loop driving the orchestrator through a run.
//!
//! Each run owns a spawned worker that calls `run_task` per iteration,
//! applies the auto-approval policy to approval gates, enforces the
//! iteration budget, and keeps a bounded agent log. Every run object that
//! crosses a public boundary is a deep clone; internal mutation happens only
//! under the runner's lock, and update callbacks run with no lock held so
//! they may re-enter `list_runs`/`get_run` freely.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use deskpilot_types::error::ControlError;
use deskpilot_types::run::{
    AgentLogEntry, AgentRole, RunApproveRequest, RunRecord, RunStatus, StartRunRequest,
};
use deskpilot_types::task::{PlanRequest, TaskApproveRequest, TaskStatus};

use crate::approval;
use crate::orchestrator::TaskOrchestrator;
use crate::planner::{BoxPlanner, DeterministicPlanner};

/// Async callback invoked with a run snapshot on every visible transition.
pub type RunUpdateCallback =
    Arc<dyn Fn(RunRecord) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`RunUpdateCallback`].
pub fn run_update_callback<F, Fut>(f: F) -> RunUpdateCallback
where
    F: Fn(RunRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |run| Box::pin(f(run)))
}

/// Default bound on the per-run agent log.
pub const DEFAULT_AGENT_LOG_CAP: usize = 200;

struct RunnerInner {
    runs: HashMap<Uuid, RunRecord>,
    /// Start order, oldest first.
    order: Vec<Uuid>,
    workers: HashMap<Uuid, JoinHandle<()>>,
}

/// Background runner that drives tasks autonomously.
///
/// Cloning the runner clones cheap shared handles; all clones operate on
/// the same run table, so worker tasks hold a clone instead of a
/// self-reference.
#[derive(Clone)]
pub struct AutonomyRunner {
    orchestrator: Arc<TaskOrchestrator>,
    planner: BoxPlanner,
    inner: Arc<Mutex<RunnerInner>>,
    on_update: Option<RunUpdateCallback>,
    log_cap: usize,
}

impl AutonomyRunner {
    pub fn new(orchestrator: Arc<TaskOrchestrator>) -> Self {
        Self {
            orchestrator,
            planner: BoxPlanner::new(DeterministicPlanner),
            inner: Arc::new(Mutex::new(RunnerInner {
                runs: HashMap::new(),
                order: Vec::new(),
                workers: HashMap::new(),
            })),
            on_update: None,
            log_cap: DEFAULT_AGENT_LOG_CAP,
        }
    }

    pub fn with_planner(mut self, planner: BoxPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_update_callback(mut self, callback: RunUpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    pub fn with_log_cap(mut self, cap: usize) -> Self {
        self.log_cap = cap.max(1);
        self
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Plan the objective, create the run record, and spawn its worker.
    pub async fn start(&self, request: StartRunRequest) -> Result<RunRecord, ControlError> {
        let task = self.orchestrator.create_task(&request.objective).await;
        let steps = self
            .planner
            .build_plan(&request.objective)
            .await
            .map_err(|e| ControlError::InvalidPlan(e.to_string()))?;
        self.orchestrator
            .set_plan(task.task_id, PlanRequest { steps })
            .await?;

        let now = Utc::now();
        let mut run = RunRecord {
            run_id: Uuid::now_v7(),
            task_id: task.task_id,
            objective: request.objective,
            planner_mode: self.planner.mode().to_string(),
            status: RunStatus::Running,
            iteration: 0,
            max_iterations: request.max_iterations,
            autonomy: request.autonomy,
            auto_approve_irreversible: request.auto_approve_irreversible,
            approval_token: None,
            last_error: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
            agent_log: Vec::new(),
        };
        append_log(
            &mut run,
            AgentRole::Planner,
            "Objective accepted and plan drafted.",
            self.log_cap,
        );
        append_log(
            &mut run,
            AgentRole::Executor,
            "Execution loop initialized.",
            self.log_cap,
        );
        append_log(
            &mut run,
            AgentRole::Verifier,
            "Safety and postcondition checks armed.",
            self.log_cap,
        );

        let snapshot = run.clone();
        {
            let mut inner = self.inner.lock().await;
            let run_id = run.run_id;
            inner.order.push(run_id);
            inner.runs.insert(run_id, run);
            let runner = self.clone();
            inner
                .workers
                .insert(run_id, tokio::spawn(async move { runner.worker_loop(run_id).await }));
        }

        self.notify_update(&snapshot).await;
        Ok(snapshot)
    }

    /// Abort all workers and drop every run.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        for (_, worker) in inner.workers.drain() {
            worker.abort();
        }
        inner.runs.clear();
        inner.order.clear();
    }

    /// Graceful shutdown: cancel every worker, await its completion, then
    /// rewrite in-flight runs to failed and emit their final snapshots.
    pub async fn shutdown(&self) {
        let workers: Vec<JoinHandle<()>> = {
            let mut inner = self.inner.lock().await;
            inner.workers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in workers {
            handle.abort();
            let _ = handle.await;
        }

        let repaired: Vec<RunRecord> = {
            let mut inner = self.inner.lock().await;
            let now = Utc::now();
            let log_cap = self.log_cap;
            inner
                .runs
                .values_mut()
                .filter(|run| !run.status.is_terminal())
                .map(|run| {
                    run.status = RunStatus::Failed;
                    run.last_error = Some(
                        "run interrupted by backend shutdown; restart objective to continue"
                            .to_string(),
                    );
                    run.approval_token = None;
                    run.finished_at = Some(now);
                    run.updated_at = now;
                    append_log(
                        run,
                        AgentRole::Verifier,
                        "Run stopped during backend shutdown.",
                        log_cap,
                    );
                    run.clone()
                })
                .collect()
        };

        for run in repaired {
            self.notify_update(&run).await;
        }
    }

    /// Replace in-memory state from durable snapshots at startup. Runs in
    /// non-terminal states are rewritten to failed; no worker is spawned for
    /// hydrated runs. Existing workers are aborted best-effort.
    pub async fn hydrate_runs(&self, runs: Vec<RunRecord>) {
        let mut sorted = runs;
        sorted.sort_by_key(|r| r.started_at);

        let mut repaired = Vec::new();
        let normalized: Vec<RunRecord> = sorted
            .into_iter()
            .map(|mut run| {
                if !run.status.is_terminal() {
                    let now = Utc::now();
                    run.status = RunStatus::Failed;
                    run.last_error = Some(
                        "run restored after restart; restart objective to continue".to_string(),
                    );
                    run.approval_token = None;
                    run.finished_at = Some(now);
                    run.updated_at = now;
                    append_log(
                        &mut run,
                        AgentRole::Verifier,
                        "Run restored as failed after process restart.",
                        self.log_cap,
                    );
                    repaired.push(run.clone());
                }
                run
            })
            .collect();

        {
            let mut inner = self.inner.lock().await;
            for (_, worker) in inner.workers.drain() {
                worker.abort();
            }
            inner.order = normalized.iter().map(|r| r.run_id).collect();
            inner.runs = normalized.into_iter().map(|r| (r.run_id, r)).collect();
        }

        for run in repaired {
            self.notify_update(&run).await;
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Most recent `limit` runs, newest first. Deep clones.
    pub async fn list_runs(&self, limit: usize) -> Vec<RunRecord> {
        let inner = self.inner.lock().await;
        if limit == 0 {
            return Vec::new();
        }
        inner
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.runs.get(id).cloned())
            .collect()
    }

    pub async fn get_run(&self, run_id: Uuid) -> Option<RunRecord> {
        self.inner.lock().await.runs.get(&run_id).cloned()
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Validate the run token, approve the underlying task, and either
    /// complete the run, re-arm the gate, or resume the worker loop.
    pub async fn approve(
        &self,
        run_id: Uuid,
        request: &RunApproveRequest,
    ) -> Result<RunRecord, ControlError> {
        let (task_id, token) = {
            let inner = self.inner.lock().await;
            let run = inner
                .runs
                .get(&run_id)
                .ok_or(ControlError::run_not_found(run_id))?;
            if run.status != RunStatus::WaitingApproval {
                return Err(ControlError::precondition(format!(
                    "run is not waiting approval (status={})",
                    run_status_tag(run.status)
                )));
            }
            let matches = run
                .approval_token
                .as_deref()
                .is_some_and(|stored| approval::tokens_match(&request.approval_token, stored));
            if !matches {
                return Err(ControlError::InvalidToken);
            }
            (run.task_id, request.approval_token.clone())
        };

        let task = self
            .orchestrator
            .approve(
                task_id,
                &TaskApproveRequest {
                    approval_token: token,
                },
            )
            .await?;

        let snapshot = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let run = inner
                .runs
                .get_mut(&run_id)
                .ok_or(ControlError::run_not_found(run_id))?;
            run.approval_token = None;
            run.updated_at = Utc::now();

            match task.status {
                TaskStatus::Completed => {
                    run.status = RunStatus::Completed;
                    run.finished_at = Some(run.updated_at);
                    append_log(
                        run,
                        AgentRole::Verifier,
                        "Approval accepted, run completed.",
                        self.log_cap,
                    );
                }
                TaskStatus::WaitingApproval => {
                    run.status = RunStatus::WaitingApproval;
                    run.approval_token = task.approval_token.clone();
                    append_log(
                        run,
                        AgentRole::Verifier,
                        "Additional approval required.",
                        self.log_cap,
                    );
                }
                _ => {
                    run.status = RunStatus::Running;
                    append_log(
                        run,
                        AgentRole::Verifier,
                        "Approval accepted, resuming execution.",
                        self.log_cap,
                    );
                    let needs_worker = inner
                        .workers
                        .get(&run_id)
                        .is_none_or(|worker| worker.is_finished());
                    if needs_worker {
                        let runner = self.clone();
                        inner.workers.insert(
                            run_id,
                            tokio::spawn(async move { runner.worker_loop(run_id).await }),
                        );
                    }
                }
            }
            run.clone()
        };

        self.notify_update(&snapshot).await;
        Ok(snapshot)
    }

    /// Cancel the run, abort its worker, and best-effort cancel the task.
    pub async fn cancel(&self, run_id: Uuid) -> Result<RunRecord, ControlError> {
        let (snapshot, task_id) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let run = inner
                .runs
                .get_mut(&run_id)
                .ok_or(ControlError::run_not_found(run_id))?;
            if run.status.is_terminal() {
                return Err(ControlError::precondition(format!(
                    "cannot cancel run with status {}",
                    run_status_tag(run.status)
                )));
            }
            let now = Utc::now();
            run.status = RunStatus::Cancelled;
            run.approval_token = None;
            run.finished_at = Some(now);
            run.updated_at = now;
            append_log(
                run,
                AgentRole::Executor,
                "Run cancelled by operator.",
                self.log_cap,
            );
            if let Some(worker) = inner.workers.get(&run_id) {
                worker.abort();
            }
            (run.clone(), run.task_id)
        };

        // The task may already be terminal; cancellation is best-effort.
        if let Err(err) = self.orchestrator.cancel_task(task_id).await {
            tracing::debug!(%task_id, error = %err, "task cancel during run cancel failed");
        }

        self.notify_update(&snapshot).await;
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // Worker loop
    // -----------------------------------------------------------------------

    async fn worker_loop(&self, run_id: Uuid) {
        loop {
            let Some(run) = self.get_run(run_id).await else {
                return;
            };
            if run.status.is_terminal() || run.status == RunStatus::WaitingApproval {
                return;
            }
            if run.iteration >= run.max_iterations {
                self.fail_run(run_id, "maximum iteration budget reached").await;
                return;
            }

            if let Err(reason) = self.run_cycle(run_id).await {
                self.fail_run(run_id, &reason).await;
                return;
            }

            let Some(after) = self.get_run(run_id).await else {
                return;
            };
            if after.status != RunStatus::Running {
                return;
            }

            // Yield between iterations so the scheduler can deliver UI
            // updates while keeping momentum.
            tokio::task::yield_now().await;
        }
    }

    /// One iteration: advance the task and fold its status into the run.
    async fn run_cycle(&self, run_id: Uuid) -> Result<(), String> {
        let task_id = {
            let mut inner = self.inner.lock().await;
            let Some(run) = inner.runs.get_mut(&run_id) else {
                return Ok(());
            };
            run.iteration += 1;
            run.updated_at = Utc::now();
            let message = format!("Iteration {}: evaluate next action set.", run.iteration);
            append_log(run, AgentRole::Planner, &message, self.log_cap);
            run.task_id
        };

        let task = self
            .orchestrator
            .run_task(task_id)
            .await
            .map_err(|e| e.to_string())?;

        {
            let mut inner = self.inner.lock().await;
            if let Some(run) = inner.runs.get_mut(&run_id) {
                append_log(
                    run,
                    AgentRole::Executor,
                    "Applied current task plan to runtime.",
                    self.log_cap,
                );
            }
        }

        match task.status {
            TaskStatus::WaitingApproval => {
                let auto = {
                    let inner = self.inner.lock().await;
                    inner
                        .runs
                        .get(&run_id)
                        .map(|run| run.auto_approves())
                        .unwrap_or(false)
                };

                if auto && task.approval_token.is_some() {
                    self.auto_approve(run_id, task_id, task.approval_token.unwrap_or_default())
                        .await
                } else {
                    let snapshot = {
                        let mut inner = self.inner.lock().await;
                        let Some(run) = inner.runs.get_mut(&run_id) else {
                            return Ok(());
                        };
                        run.status = RunStatus::WaitingApproval;
                        run.approval_token = task.approval_token.clone();
                        run.updated_at = Utc::now();
                        append_log(
                            run,
                            AgentRole::Verifier,
                            "Irreversible step blocked pending operator approval.",
                            self.log_cap,
                        );
                        run.clone()
                    };
                    self.notify_update(&snapshot).await;
                    Ok(())
                }
            }
            TaskStatus::Completed => {
                let snapshot = {
                    let mut inner = self.inner.lock().await;
                    let Some(run) = inner.runs.get_mut(&run_id) else {
                        return Ok(());
                    };
                    let now = Utc::now();
                    run.status = RunStatus::Completed;
                    run.approval_token = None;
                    run.finished_at = Some(now);
                    run.updated_at = now;
                    append_log(
                        run,
                        AgentRole::Verifier,
                        "All postconditions satisfied. Run completed.",
                        self.log_cap,
                    );
                    run.clone()
                };
                self.notify_update(&snapshot).await;
                Ok(())
            }
            TaskStatus::Failed | TaskStatus::Cancelled => Err(format!(
                "task ended with status {}",
                task_status_tag(task.status)
            )),
            _ => {
                let snapshot = self.get_run(run_id).await;
                if let Some(run) = snapshot {
                    self.notify_update(&run).await;
                }
                Ok(())
            }
        }
    }

    /// Apply the auto-approval policy to a freshly minted gate.
    async fn auto_approve(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        token: String,
    ) -> Result<(), String> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(run) = inner.runs.get_mut(&run_id) {
                append_log(
                    run,
                    AgentRole::Verifier,
                    "Irreversible step auto-approved by configuration.",
                    self.log_cap,
                );
            }
        }

        let approved = self
            .orchestrator
            .approve(
                task_id,
                &TaskApproveRequest {
                    approval_token: token,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        let snapshot = {
            let mut inner = self.inner.lock().await;
            let Some(run) = inner.runs.get_mut(&run_id) else {
                return Ok(());
            };
            run.updated_at = Utc::now();
            run.approval_token = None;
            match approved.status {
                TaskStatus::Completed => {
                    run.status = RunStatus::Completed;
                    run.finished_at = Some(run.updated_at);
                    append_log(
                        run,
                        AgentRole::Verifier,
                        "Auto-approval completed run.",
                        self.log_cap,
                    );
                }
                TaskStatus::WaitingApproval => {
                    run.status = RunStatus::WaitingApproval;
                    run.approval_token = approved.approval_token.clone();
                    append_log(
                        run,
                        AgentRole::Verifier,
                        "Additional approval still required.",
                        self.log_cap,
                    );
                }
                _ => {
                    run.status = RunStatus::Running;
                    append_log(
                        run,
                        AgentRole::Verifier,
                        "Auto-approval applied, continuing run.",
                        self.log_cap,
                    );
                }
            }
            run.clone()
        };
        self.notify_update(&snapshot).await;
        Ok(())
    }

    async fn fail_run(&self, run_id: Uuid, reason: &str) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let Some(run) = inner.runs.get_mut(&run_id) else {
                return;
            };
            // Terminal statuses are sticky; a late failure report cannot
            // overwrite a cancel.
            if run.status.is_terminal() {
                return;
            }
            let now = Utc::now();
            run.status = RunStatus::Failed;
            run.last_error = Some(reason.to_string());
            run.approval_token = None;
            run.finished_at = Some(now);
            run.updated_at = now;
            let message = format!("Run failed: {reason}");
            append_log(run, AgentRole::Verifier, &message, self.log_cap);
            run.clone()
        };
        self.notify_update(&snapshot).await;
    }

    async fn notify_update(&self, run: &RunRecord) {
        let Some(callback) = &self.on_update else {
            return;
        };
        callback(run.clone()).await;
    }
}

/// Append one log line, dropping the oldest entries beyond the cap.
fn append_log(run: &mut RunRecord, agent: AgentRole, message: &str, cap: usize) {
    run.agent_log.push(AgentLogEntry {
        timestamp: Utc::now(),
        agent,
        message: message.to_string(),
    });
    if run.agent_log.len() > cap {
        let excess = run.agent_log.len() - cap;
        run.agent_log.drain(..excess);
    }
}

fn run_status_tag(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::WaitingApproval => "waiting_approval",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn task_status_tag(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Created => "created",
        TaskStatus::Planned => "planned",
        TaskStatus::Running => "running",
        TaskStatus::WaitingApproval => "waiting_approval",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::time::Duration;

    use deskpilot_types::run::AutonomyLevel;

    const GATED_OBJECTIVE: &str = "Open outlook, draft reply, then send email";
    const PLAIN_OBJECTIVE: &str = "Observe desktop and verify outcome";

    async fn wait_for_status(
        runner: &AutonomyRunner,
        run_id: Uuid,
        expected: RunStatus,
    ) -> RunRecord {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(1500);
        let mut last = None;
        while tokio::time::Instant::now() < deadline {
            if let Some(run) = runner.get_run(run_id).await {
                last = Some(run.status);
                if run.status == expected {
                    return runner.get_run(run_id).await.unwrap();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {run_id} did not reach {expected:?}, last status={last:?}");
    }

    fn runner() -> Arc<AutonomyRunner> {
        Arc::new(AutonomyRunner::new(Arc::new(TaskOrchestrator::new())))
    }

    #[tokio::test]
    async fn plain_objective_completes_autonomously() {
        let runner = runner();
        let started = runner
            .start(StartRunRequest::new(PLAIN_OBJECTIVE))
            .await
            .unwrap();
        assert_eq!(started.planner_mode, "deterministic");
        assert!(started.agent_log.len() >= 3);

        let done = wait_for_status(&runner, started.run_id, RunStatus::Completed).await;
        assert!(done.finished_at.is_some());
        assert!(done.approval_token.is_none());
        assert_eq!(done.iteration, 1);
    }

    #[tokio::test]
    async fn gated_objective_waits_then_approval_completes() {
        let runner = runner();
        let started = runner
            .start(StartRunRequest::new(GATED_OBJECTIVE))
            .await
            .unwrap();

        let waiting = wait_for_status(&runner, started.run_id, RunStatus::WaitingApproval).await;
        let token = waiting.approval_token.clone().unwrap();

        let approved = runner
            .approve(
                started.run_id,
                &RunApproveRequest {
                    approval_token: token,
                },
            )
            .await
            .unwrap();
        assert_eq!(approved.status, RunStatus::Completed);
        assert!(approved.approval_token.is_none());

        // The run token mirrored the task token while waiting.
        let task = runner
            .orchestrator
            .get_task(started.task_id)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn invalid_run_token_is_rejected_without_state_change() {
        let runner = runner();
        let started = runner
            .start(StartRunRequest::new(GATED_OBJECTIVE))
            .await
            .unwrap();
        let waiting = wait_for_status(&runner, started.run_id, RunStatus::WaitingApproval).await;
        let original = waiting.approval_token.clone().unwrap();

        let err = runner
            .approve(
                started.run_id,
                &RunApproveRequest {
                    approval_token: "wrong".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidToken));

        let after = runner.get_run(started.run_id).await.unwrap();
        assert_eq!(after.status, RunStatus::WaitingApproval);
        assert_eq!(after.approval_token.unwrap(), original);
    }

    #[tokio::test]
    async fn guided_autonomy_auto_approves_the_gate() {
        let runner = runner();
        let mut request = StartRunRequest::new(GATED_OBJECTIVE);
        request.autonomy = AutonomyLevel::Guided;
        let started = runner.start(request).await.unwrap();

        let done = wait_for_status(&runner, started.run_id, RunStatus::Completed).await;
        assert!(done.approval_token.is_none());
        assert!(
            done.agent_log
                .iter()
                .any(|entry| entry.message.contains("auto-approved"))
        );
    }

    #[tokio::test]
    async fn auto_approve_flag_works_at_supervised_level() {
        let runner = runner();
        let mut request = StartRunRequest::new(GATED_OBJECTIVE);
        request.auto_approve_irreversible = true;
        let started = runner.start(request).await.unwrap();

        wait_for_status(&runner, started.run_id, RunStatus::Completed).await;
    }

    #[tokio::test]
    async fn exhausted_iteration_budget_fails_the_run() {
        let runner = runner();
        let mut request = StartRunRequest::new(PLAIN_OBJECTIVE);
        request.max_iterations = 0;
        let started = runner.start(request).await.unwrap();

        let failed = wait_for_status(&runner, started.run_id, RunStatus::Failed).await;
        assert_eq!(
            failed.last_error.unwrap(),
            "maximum iteration budget reached"
        );
    }

    #[tokio::test]
    async fn cancel_propagates_to_task() {
        let runner = runner();
        let started = runner
            .start(StartRunRequest::new(GATED_OBJECTIVE))
            .await
            .unwrap();
        wait_for_status(&runner, started.run_id, RunStatus::WaitingApproval).await;

        let cancelled = runner.cancel(started.run_id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());

        let task = runner
            .orchestrator
            .get_task(started.task_id)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);

        // Terminal runs cannot be cancelled twice.
        let err = runner.cancel(started.run_id).await.unwrap_err();
        assert!(matches!(err, ControlError::Precondition(_)));
    }

    #[tokio::test]
    async fn shutdown_marks_inflight_runs_failed() {
        let runner = runner();
        let started = runner
            .start(StartRunRequest::new(GATED_OBJECTIVE))
            .await
            .unwrap();
        let waiting = wait_for_status(&runner, started.run_id, RunStatus::WaitingApproval).await;
        assert!(waiting.approval_token.is_some());

        runner.shutdown().await;
        let after = runner.get_run(started.run_id).await.unwrap();
        assert_eq!(after.status, RunStatus::Failed);
        assert!(after.finished_at.is_some());
        assert!(after.approval_token.is_none());
        assert!(after.last_error.unwrap().contains("shutdown"));
    }

    #[tokio::test]
    async fn hydrate_rewrites_nonterminal_runs_to_failed() {
        let runner = runner();
        let started = runner
            .start(StartRunRequest::new(GATED_OBJECTIVE))
            .await
            .unwrap();
        let waiting = wait_for_status(&runner, started.run_id, RunStatus::WaitingApproval).await;

        let restored = Arc::new(AutonomyRunner::new(Arc::new(TaskOrchestrator::new())));
        restored.hydrate_runs(vec![waiting.clone()]).await;
        let hydrated = restored.get_run(waiting.run_id).await.unwrap();
        assert_eq!(hydrated.status, RunStatus::Failed);
        assert!(hydrated.approval_token.is_none());
        assert!(
            hydrated
                .last_error
                .unwrap()
                .contains("restored after restart")
        );
        // No worker was spawned for the hydrated run.
        assert!(restored.inner.lock().await.workers.is_empty());
    }

    #[tokio::test]
    async fn snapshots_are_deep_copies() {
        let runner = runner();
        let started = runner
            .start(StartRunRequest::new(PLAIN_OBJECTIVE))
            .await
            .unwrap();
        wait_for_status(&runner, started.run_id, RunStatus::Completed).await;

        let mut first = runner.get_run(started.run_id).await.unwrap();
        first.status = RunStatus::Failed;
        first.last_error = Some("mutated externally".to_string());

        let second = runner.get_run(started.run_id).await.unwrap();
        assert_eq!(second.status, RunStatus::Completed);
        assert!(second.last_error.is_none());

        let mut listed = runner.list_runs(10).await;
        listed[0].agent_log.clear();
        let fresh = runner.get_run(started.run_id).await.unwrap();
        assert!(!fresh.agent_log.is_empty());
    }

    #[tokio::test]
    async fn agent_log_is_bounded() {
        let orchestrator = Arc::new(TaskOrchestrator::new());
        let runner = Arc::new(
            AutonomyRunner::new(orchestrator)
                .with_log_cap(4),
        );
        let started = runner
            .start(StartRunRequest::new(PLAIN_OBJECTIVE))
            .await
            .unwrap();
        let done = wait_for_status(&runner, started.run_id, RunStatus::Completed).await;
        assert!(done.agent_log.len() <= 4);
        // The oldest bootstrap entries were dropped.
        assert!(
            !done
                .agent_log
                .iter()
                .any(|entry| entry.message.contains("Objective accepted"))
        );
    }

    // -- re-entrancy regressions -------------------------------------------

    /// Shared slot so the update callback can call back into the runner.
    fn reentrant_runner() -> (Arc<AutonomyRunner>, Arc<OnceLock<Arc<AutonomyRunner>>>) {
        let slot: Arc<OnceLock<Arc<AutonomyRunner>>> = Arc::new(OnceLock::new());
        let callback = {
            let slot = slot.clone();
            run_update_callback(move |_run| {
                let slot = slot.clone();
                async move {
                    if let Some(runner) = slot.get() {
                        // Re-entrant read must not deadlock.
                        runner.list_runs(5).await;
                    }
                }
            })
        };
        let runner = Arc::new(
            AutonomyRunner::new(Arc::new(TaskOrchestrator::new()))
                .with_update_callback(callback),
        );
        slot.set(runner.clone()).ok();
        (runner, slot)
    }

    #[tokio::test]
    async fn approve_update_callback_can_read_runner_without_deadlock() {
        let (runner, _slot) = reentrant_runner();
        let started = runner
            .start(StartRunRequest::new(GATED_OBJECTIVE))
            .await
            .unwrap();
        let waiting = wait_for_status(&runner, started.run_id, RunStatus::WaitingApproval).await;

        let approved = tokio::time::timeout(
            Duration::from_millis(500),
            runner.approve(
                started.run_id,
                &RunApproveRequest {
                    approval_token: waiting.approval_token.unwrap(),
                },
            ),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(approved.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_update_callback_can_read_runner_without_deadlock() {
        let (runner, _slot) = reentrant_runner();
        let started = runner
            .start(StartRunRequest::new(GATED_OBJECTIVE))
            .await
            .unwrap();
        wait_for_status(&runner, started.run_id, RunStatus::WaitingApproval).await;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(500), runner.cancel(started.run_id))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn budget_failure_update_callback_can_read_runner_without_deadlock() {
        let (runner, _slot) = reentrant_runner();
        let mut request = StartRunRequest::new(PLAIN_OBJECTIVE);
        request.max_iterations = 0;
        let started = runner.start(request).await.unwrap();

        let failed = wait_for_status(&runner, started.run_id, RunStatus::Failed).await;
        assert!(failed.last_error.is_some());
    }
}
