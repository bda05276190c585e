//! Task domain types for Deskpilot.
//!
//! A task is one plan (an ordered list of steps, each wrapping a single
//! abstract action) plus its execution state. The orchestrator owns the
//! live records; everything that crosses a component boundary is a deep
//! clone of these types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One abstract desktop operation dispatched to an action executor.
///
/// The backend never interprets `action` beyond alias mapping; it is an
/// opaque instruction for whichever executor variant is wired in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAction {
    /// Identifier of the operation (e.g. "observe_desktop", "send_or_submit").
    pub action: String,
    /// Parameter mapping forwarded to the executor.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Human-readable description shown to the operator.
    #[serde(default)]
    pub description: String,
    /// Whether executing this action has external side effects that cannot
    /// be undone. Irreversible steps require approval before dispatch.
    #[serde(default)]
    pub irreversible: bool,
}

impl TaskAction {
    /// Convenience constructor for a reversible action without parameters.
    pub fn new(action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: HashMap::new(),
            description: description.into(),
            irreversible: false,
        }
    }

    pub fn irreversible(mut self) -> Self {
        self.irreversible = true;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Status of a single plan step.
///
/// Transitions: pending -> (blocked -> pending)? -> running -> succeeded | failed.
/// `succeeded` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Blocked,
    Running,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed)
    }
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Planned,
    Running,
    WaitingApproval,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are sticky: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// Steps and records
// ---------------------------------------------------------------------------

/// One unit of a plan, with execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    /// Stable step identifier.
    pub step_id: Uuid,
    /// Zero-based position within the owning task. Contiguous and monotonic.
    pub index: usize,
    pub action: TaskAction,
    /// Advisory precondition text. Never evaluated by the backend.
    #[serde(default)]
    pub preconditions: Vec<String>,
    /// Advisory postcondition text. Never evaluated by the backend.
    #[serde(default)]
    pub postconditions: Vec<String>,
    pub status: StepStatus,
    /// Set by operator approval or the runner's auto-approval policy.
    pub approved: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Result mapping from the most recent dispatch.
    pub result: Option<serde_json::Value>,
    /// Error string from the most recent failed dispatch.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task: one objective, one plan, and the execution state around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    /// Free-text objective the plan was built for.
    pub objective: String,
    #[serde(default)]
    pub steps: Vec<TaskStep>,
    pub status: TaskStatus,
    /// Index of the step currently running or awaiting approval.
    pub current_step_index: Option<usize>,
    /// Present iff status is `waiting_approval`. Single-use, CSPRNG-minted.
    pub approval_token: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Fresh task in `created` status with no plan.
    pub fn new(objective: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            task_id: Uuid::now_v7(),
            objective: objective.into(),
            steps: Vec::new(),
            status: TaskStatus::Created,
            current_step_index: None,
            approval_token: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One planned step as produced by a planner, before compilation into a
/// [`TaskStep`] with ids and execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPlan {
    pub action: TaskAction,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub postconditions: Vec<String>,
}

impl StepPlan {
    pub fn new(action: TaskAction) -> Self {
        Self {
            action,
            preconditions: Vec::new(),
            postconditions: Vec::new(),
        }
    }
}

/// Request body for replacing a task's plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub steps: Vec<StepPlan>,
}

/// Request body for approving a blocked task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskApproveRequest {
    pub approval_token: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_task() -> TaskRecord {
        let now = Utc::now();
        let mut task = TaskRecord::new("Open outlook and reply", now);
        task.steps = vec![TaskStep {
            step_id: Uuid::now_v7(),
            index: 0,
            action: TaskAction::new("observe_desktop", "Capture desktop context")
                .with_parameter("depth", json!(1)),
            preconditions: vec!["runtime connected".to_string()],
            postconditions: vec!["context snapshot captured".to_string()],
            status: StepStatus::Pending,
            approved: false,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }];
        task
    }

    #[test]
    fn test_task_record_json_roundtrip() {
        let task = sample_task();
        let json_str = serde_json::to_string(&task).unwrap();
        let parsed: TaskRecord = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.task_id, task.task_id);
        assert_eq!(parsed.status, TaskStatus::Created);
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.steps[0].action.action, "observe_desktop");
        assert!(parsed.approval_token.is_none());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
        let json = serde_json::to_string(&StepStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::WaitingApproval.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());

        assert!(StepStatus::Succeeded.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(!StepStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_plan_request_defaults() {
        let json = r#"{"steps":[{"action":{"action":"observe_desktop"}}]}"#;
        let plan: PlanRequest = serde_json::from_str(json).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].preconditions.is_empty());
        assert!(!plan.steps[0].action.irreversible);
        assert!(plan.steps[0].action.parameters.is_empty());
    }

    #[test]
    fn test_action_builder() {
        let action = TaskAction::new("send_or_submit", "Send the reply").irreversible();
        assert!(action.irreversible);
        assert_eq!(action.description, "Send the reply");
    }
}
