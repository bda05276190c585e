//! Task orchestrator: step-by-step execution with approval gates and retries.
//!
//! Owns the live task table behind one async mutex. The advance cycle picks
//! the next pending step, parks irreversible unapproved steps behind a
//! freshly minted approval token, and dispatches everything else to the
//! action executor *outside* the lock -- a dispatch can take seconds and may
//! read the state store, which has its own lock.
//!
//! Every externally visible transition emits a deep clone of the task to the
//! update callback on a spawned job, so callbacks can re-enter the
//! orchestrator without deadlock and never block a state transition.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use deskpilot_types::error::ControlError;
use deskpilot_types::task::{
    PlanRequest, StepStatus, TaskApproveRequest, TaskRecord, TaskStatus, TaskStep,
};

use crate::approval;
use crate::executor::simulated::SimulatedExecutor;
use crate::executor::{BoxActionExecutor, ExecutionOutcome, ExecutorStatus, PreflightReport};
use crate::state_store::StateStore;

/// Async callback invoked with a task snapshot on every visible transition.
pub type TaskUpdateCallback =
    Arc<dyn Fn(TaskRecord) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`TaskUpdateCallback`].
pub fn task_update_callback<F, Fut>(f: F) -> TaskUpdateCallback
where
    F: Fn(TaskRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |task| Box::pin(f(task)))
}

struct OrchestratorInner {
    tasks: HashMap<Uuid, TaskRecord>,
    /// Creation order, oldest first.
    order: Vec<Uuid>,
}

/// Per-task state machine with a pluggable action execution backend.
pub struct TaskOrchestrator {
    inner: Mutex<OrchestratorInner>,
    executor: BoxActionExecutor,
    retry_count: u32,
    retry_delay: Duration,
    state_store: Option<Arc<StateStore>>,
    on_update: Option<TaskUpdateCallback>,
    update_jobs: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for TaskOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskOrchestrator {
    /// Orchestrator with the simulated executor and no callbacks.
    pub fn new() -> Self {
        Self::with_executor(BoxActionExecutor::new(SimulatedExecutor))
    }

    pub fn with_executor(executor: BoxActionExecutor) -> Self {
        Self {
            inner: Mutex::new(OrchestratorInner {
                tasks: HashMap::new(),
                order: Vec::new(),
            }),
            executor,
            retry_count: 1,
            retry_delay: Duration::from_millis(50),
            state_store: None,
            on_update: None,
            update_jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_update_callback(mut self, callback: TaskUpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    pub fn with_state_store(mut self, store: Arc<StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Dispatch attempts per step (floored at 1) and the delay between them.
    pub fn with_retry(mut self, count: u32, delay: Duration) -> Self {
        self.retry_count = count.max(1);
        self.retry_delay = delay;
        self
    }

    // -----------------------------------------------------------------------
    // Executor passthroughs
    // -----------------------------------------------------------------------

    pub fn executor_status(&self) -> ExecutorStatus {
        self.executor.status()
    }

    pub async fn executor_preflight(&self) -> PreflightReport {
        self.executor.preflight().await
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub async fn create_task(&self, objective: &str) -> TaskRecord {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let task = TaskRecord::new(objective, Utc::now());
            inner.order.push(task.task_id);
            inner.tasks.insert(task.task_id, task.clone());
            task
        };
        self.notify_update(&snapshot).await;
        snapshot
    }

    /// Drop all tasks and abort in-flight update callbacks.
    pub async fn reset(&self) {
        for job in self.update_jobs.lock().await.drain(..) {
            job.abort();
        }
        let mut inner = self.inner.lock().await;
        inner.tasks.clear();
        inner.order.clear();
    }

    /// Wait for spawned update callbacks to finish. Returns `false` when a
    /// timeout was given and jobs were still pending; those jobs stay
    /// tracked for the next drain.
    pub async fn drain_updates(&self, timeout: Option<Duration>) -> bool {
        let mut handles: Vec<JoinHandle<()>> = {
            let mut jobs = self.update_jobs.lock().await;
            jobs.drain(..).collect()
        };
        if handles.is_empty() {
            return true;
        }
        let wait_all = futures_util::future::join_all(handles.iter_mut());
        let drained = match timeout {
            None => {
                wait_all.await;
                true
            }
            Some(t) => tokio::time::timeout(t, wait_all).await.is_ok(),
        };
        if !drained {
            handles.retain(|h| !h.is_finished());
            self.update_jobs.lock().await.extend(handles);
        }
        drained
    }

    /// Replace in-memory state from durable snapshots at startup.
    ///
    /// Tasks caught mid-flight (running or waiting approval) are rewritten
    /// to failed and never resumed, preserving at-most-once side effects.
    pub async fn hydrate_tasks(&self, tasks: Vec<TaskRecord>) {
        for job in self.update_jobs.lock().await.drain(..) {
            job.abort();
        }

        let mut sorted = tasks;
        sorted.sort_by_key(|t| t.created_at);

        let mut repaired = Vec::new();
        let normalized: Vec<TaskRecord> = sorted
            .into_iter()
            .map(|mut task| {
                if matches!(
                    task.status,
                    TaskStatus::Running | TaskStatus::WaitingApproval
                ) {
                    task.status = TaskStatus::Failed;
                    task.approval_token = None;
                    task.last_error =
                        Some("task restored after restart; rerun task to continue".to_string());
                    task.updated_at = Utc::now();
                    repaired.push(task.clone());
                }
                task
            })
            .collect();

        {
            let mut inner = self.inner.lock().await;
            inner.order = normalized.iter().map(|t| t.task_id).collect();
            inner.tasks = normalized.into_iter().map(|t| (t.task_id, t)).collect();
        }

        for task in repaired {
            self.notify_update(&task).await;
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Most recent `limit` tasks, newest first. Deep clones.
    pub async fn list_tasks(&self, limit: usize) -> Vec<TaskRecord> {
        let inner = self.inner.lock().await;
        if limit == 0 {
            return Vec::new();
        }
        inner
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect()
    }

    pub async fn get_task(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.inner.lock().await.tasks.get(&task_id).cloned()
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Install a plan. Only `created` and `planned` tasks accept one.
    pub async fn set_plan(
        &self,
        task_id: Uuid,
        request: PlanRequest,
    ) -> Result<TaskRecord, ControlError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get_mut(&task_id)
                .ok_or(ControlError::task_not_found(task_id))?;
            if !matches!(task.status, TaskStatus::Created | TaskStatus::Planned) {
                return Err(ControlError::precondition(format!(
                    "cannot replace plan when task status is {}",
                    status_tag(task.status)
                )));
            }

            let now = Utc::now();
            task.steps = request
                .steps
                .into_iter()
                .enumerate()
                .map(|(index, plan)| TaskStep {
                    step_id: Uuid::now_v7(),
                    index,
                    action: plan.action,
                    preconditions: plan.preconditions,
                    postconditions: plan.postconditions,
                    status: StepStatus::Pending,
                    approved: false,
                    started_at: None,
                    finished_at: None,
                    result: None,
                    error: None,
                    created_at: now,
                    updated_at: now,
                })
                .collect();
            task.current_step_index = None;
            task.approval_token = None;
            task.last_error = None;
            task.status = TaskStatus::Planned;
            task.updated_at = now;
            task.clone()
        };
        self.notify_update(&snapshot).await;
        Ok(snapshot)
    }

    /// Drive the task until it completes, fails, waits for approval, or is
    /// paused. Dispatches happen outside the task lock.
    pub async fn run_task(&self, task_id: Uuid) -> Result<TaskRecord, ControlError> {
        {
            let inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get(&task_id)
                .ok_or(ControlError::task_not_found(task_id))?;
            if task.status.is_terminal() {
                return Err(ControlError::precondition(format!(
                    "cannot run task with status {}",
                    status_tag(task.status)
                )));
            }
            if task.steps.is_empty() {
                return Err(ControlError::InvalidPlan("task has no plan steps".to_string()));
            }
        }
        let snapshot = self.advance(task_id).await?;
        self.notify_update(&snapshot).await;
        Ok(snapshot)
    }

    /// Approve the blocked step gated by `approval_token` and resume.
    pub async fn approve(
        &self,
        task_id: Uuid,
        request: &TaskApproveRequest,
    ) -> Result<TaskRecord, ControlError> {
        {
            let mut inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get_mut(&task_id)
                .ok_or(ControlError::task_not_found(task_id))?;
            if task.status != TaskStatus::WaitingApproval {
                return Err(ControlError::precondition(format!(
                    "task is not waiting approval (status={})",
                    status_tag(task.status)
                )));
            }
            let matches = task
                .approval_token
                .as_deref()
                .is_some_and(|token| approval::tokens_match(&request.approval_token, token));
            if !matches {
                return Err(ControlError::InvalidToken);
            }

            let idx = task
                .current_step_index
                .filter(|&idx| idx < task.steps.len())
                .ok_or_else(|| {
                    ControlError::Internal(
                        "task waiting approval but has no current step".to_string(),
                    )
                })?;

            let step = &mut task.steps[idx];
            step.approved = true;
            if step.status == StepStatus::Blocked {
                step.status = StepStatus::Pending;
            }
            task.status = TaskStatus::Planned;
            task.approval_token = None;
            task.updated_at = Utc::now();
        }
        let snapshot = self.advance(task_id).await?;
        self.notify_update(&snapshot).await;
        Ok(snapshot)
    }

    pub async fn pause_task(&self, task_id: Uuid) -> Result<TaskRecord, ControlError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get_mut(&task_id)
                .ok_or(ControlError::task_not_found(task_id))?;
            if task.status.is_terminal() {
                return Err(ControlError::precondition(format!(
                    "cannot pause task with status {}",
                    status_tag(task.status)
                )));
            }
            task.status = TaskStatus::Paused;
            task.updated_at = Utc::now();
            task.clone()
        };
        self.notify_update(&snapshot).await;
        Ok(snapshot)
    }

    pub async fn resume_task(&self, task_id: Uuid) -> Result<TaskRecord, ControlError> {
        {
            let inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get(&task_id)
                .ok_or(ControlError::task_not_found(task_id))?;
            if task.status != TaskStatus::Paused {
                return Err(ControlError::precondition(format!(
                    "cannot resume task with status {}",
                    status_tag(task.status)
                )));
            }
        }
        let snapshot = self.advance(task_id).await?;
        self.notify_update(&snapshot).await;
        Ok(snapshot)
    }

    pub async fn cancel_task(&self, task_id: Uuid) -> Result<TaskRecord, ControlError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get_mut(&task_id)
                .ok_or(ControlError::task_not_found(task_id))?;
            if task.status.is_terminal() {
                return Err(ControlError::precondition(format!(
                    "cannot cancel task with status {}",
                    status_tag(task.status)
                )));
            }
            task.status = TaskStatus::Cancelled;
            task.updated_at = Utc::now();
            task.clone()
        };
        self.notify_update(&snapshot).await;
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // Advance cycle
    // -----------------------------------------------------------------------

    async fn advance(&self, task_id: Uuid) -> Result<TaskRecord, ControlError> {
        loop {
            // Phase 1 (locked): pick the next step or settle the task.
            let (action, objective, step_index) = {
                let mut inner = self.inner.lock().await;
                let task = inner
                    .tasks
                    .get_mut(&task_id)
                    .ok_or(ControlError::task_not_found(task_id))?;
                if task.status.is_terminal() || task.status == TaskStatus::WaitingApproval {
                    return Ok(task.clone());
                }
                if task.steps.is_empty() {
                    return Err(ControlError::InvalidPlan("task has no plan steps".to_string()));
                }

                task.status = TaskStatus::Running;
                let now = Utc::now();
                let Some(next_idx) = next_pending_step_index(task) else {
                    task.current_step_index = None;
                    task.approval_token = None;
                    task.status = TaskStatus::Completed;
                    task.updated_at = now;
                    return Ok(task.clone());
                };

                task.current_step_index = Some(next_idx);
                let objective = task.objective.clone();
                let step = &mut task.steps[next_idx];
                step.updated_at = now;

                if step.action.irreversible && !step.approved {
                    step.status = StepStatus::Blocked;
                    task.status = TaskStatus::WaitingApproval;
                    task.approval_token = Some(approval::mint_token());
                    task.updated_at = now;
                    return Ok(task.clone());
                }

                step.status = StepStatus::Running;
                step.started_at = Some(now);
                (step.action.clone(), objective, next_idx)
            };

            // Phase 2 (unlocked): dispatch with retries.
            let outcome = self.execute_with_retry(&action, &objective).await;
            let finished_at = Utc::now();

            // Phase 3 (locked): commit the result, unless the step moved on.
            {
                let mut inner = self.inner.lock().await;
                let task = inner
                    .tasks
                    .get_mut(&task_id)
                    .ok_or(ControlError::task_not_found(task_id))?;
                // Terminal statuses are sticky; a result that raced a cancel
                // is discarded.
                if task.status.is_terminal() {
                    return Ok(task.clone());
                }
                let Some(step) = task.steps.get_mut(step_index) else {
                    return Ok(task.clone());
                };
                if !matches!(step.status, StepStatus::Running | StepStatus::Pending) {
                    return Ok(task.clone());
                }

                if !outcome.ok {
                    step.status = StepStatus::Failed;
                    step.error = outcome.error.clone();
                    step.result = Some(outcome.result);
                    step.finished_at = Some(finished_at);
                    step.updated_at = finished_at;
                    task.status = TaskStatus::Failed;
                    task.last_error =
                        Some(outcome.error.unwrap_or_else(|| "executor failed".to_string()));
                    task.approval_token = None;
                    task.updated_at = finished_at;
                    return Ok(task.clone());
                }

                step.status = StepStatus::Succeeded;
                step.error = None;
                step.result = Some(outcome.result);
                step.finished_at = Some(finished_at);
                step.updated_at = finished_at;
                task.updated_at = finished_at;
                if task.status == TaskStatus::Paused {
                    return Ok(task.clone());
                }
            }
        }
    }

    /// Dispatch one action with the configured retry policy.
    ///
    /// Errors carrying the "unsupported action" marker are attempted once;
    /// the final result mapping always carries an `attempts` count.
    async fn execute_with_retry(
        &self,
        action: &deskpilot_types::task::TaskAction,
        objective: &str,
    ) -> ExecutionOutcome {
        let observation = match &self.state_store {
            Some(store) => store.observation().await,
            None => None,
        };

        let mut last: Option<ExecutionOutcome> = None;
        for attempt in 1..=self.retry_count {
            let outcome = self
                .executor
                .execute(action, objective, observation.as_ref())
                .await;
            let stamped = outcome.clone().with_attempts(attempt);
            if stamped.ok {
                return stamped;
            }
            if !should_retry(stamped.error.as_deref()) {
                return stamped;
            }
            last = Some(outcome);
            if attempt < self.retry_count && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        match last {
            Some(outcome) => outcome.with_attempts(self.retry_count),
            None => ExecutionOutcome::failed(
                "action executor did not produce a result",
                json!({
                    "executor": self.executor.mode(),
                    "action": action.action,
                    "ok": false,
                    "attempts": 0,
                }),
            ),
        }
    }

    async fn notify_update(&self, task: &TaskRecord) {
        let Some(callback) = &self.on_update else {
            return;
        };
        let fut = callback(task.clone());
        let handle = tokio::spawn(fut);
        let mut jobs = self.update_jobs.lock().await;
        jobs.retain(|job| !job.is_finished());
        jobs.push(handle);
    }
}

fn next_pending_step_index(task: &TaskRecord) -> Option<usize> {
    task.steps
        .iter()
        .position(|step| matches!(step.status, StepStatus::Pending | StepStatus::Blocked))
}

fn should_retry(error: Option<&str>) -> bool {
    match error {
        None => true,
        Some(message) => !message.to_lowercase().contains("unsupported action"),
    }
}

fn status_tag(status: TaskStatus) -> &'static str {
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
