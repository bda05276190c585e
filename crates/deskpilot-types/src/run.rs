//! Autonomy run types.
//!
//! A run is one outer-loop invocation of the orchestrator over a task: the
//! runner plans the objective, drives `run_task` through iterations, applies
//! the auto-approval policy, and keeps a bounded agent log for the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Autonomy level and run status
// ---------------------------------------------------------------------------

/// How much freedom the runner has over irreversible steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Every irreversible step waits for operator approval.
    Supervised,
    /// Irreversible steps are auto-approved; the operator watches the log.
    Guided,
    /// Fully autonomous; no approval gates are surfaced.
    Autonomous,
}

impl AutonomyLevel {
    /// Whether this level auto-approves irreversible steps.
    pub fn auto_approves(self) -> bool {
        matches!(self, AutonomyLevel::Guided | AutonomyLevel::Autonomous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// Agent log
// ---------------------------------------------------------------------------

/// Which internal agent produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    Planner,
    Executor,
    Verifier,
    VisionAgent,
}

/// One line of the run's bounded agent log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: AgentRole,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// One autonomy run: the outer loop's state over a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    /// Task this run drives.
    pub task_id: Uuid,
    pub objective: String,
    /// Tag of the planner implementation that produced the plan.
    pub planner_mode: String,
    pub status: RunStatus,
    /// Completed worker-loop iterations.
    pub iteration: u32,
    /// Hard budget; exceeding it fails the run.
    pub max_iterations: u32,
    pub autonomy: AutonomyLevel,
    pub auto_approve_irreversible: bool,
    /// Present iff status is `waiting_approval`; mirrors the task's token.
    pub approval_token: Option<String>,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Bounded log; oldest entries drop on overflow.
    #[serde(default)]
    pub agent_log: Vec<AgentLogEntry>,
}

impl RunRecord {
    /// Whether irreversible steps should be approved without the operator.
    pub fn auto_approves(&self) -> bool {
        self.auto_approve_irreversible || self.autonomy.auto_approves()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

fn default_max_iterations() -> u32 {
    25
}

fn default_autonomy() -> AutonomyLevel {
    AutonomyLevel::Supervised
}

/// Request body for starting an autonomy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRunRequest {
    pub objective: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_autonomy")]
    pub autonomy: AutonomyLevel,
    #[serde(default)]
    pub auto_approve_irreversible: bool,
}

impl StartRunRequest {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            max_iterations: default_max_iterations(),
            autonomy: default_autonomy(),
            auto_approve_irreversible: false,
        }
    }
}

/// Request body for approving a waiting run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunApproveRequest {
    pub approval_token: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_autonomy_level_auto_approval() {
        assert!(!AutonomyLevel::Supervised.auto_approves());
        assert!(AutonomyLevel::Guided.auto_approves());
        assert!(AutonomyLevel::Autonomous.auto_approves());
    }

    #[test]
    fn test_run_record_auto_approves_flag_or_level() {
        let now = Utc::now();
        let mut run = RunRecord {
            run_id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            objective: "test".to_string(),
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
        };
        assert!(!run.auto_approves());

        run.auto_approve_irreversible = true;
        assert!(run.auto_approves());

        run.auto_approve_irreversible = false;
        run.autonomy = AutonomyLevel::Guided;
        assert!(run.auto_approves());
    }

    #[test]
    fn test_agent_role_kebab_case() {
        let json = serde_json::to_string(&AgentRole::VisionAgent).unwrap();
        assert_eq!(json, "\"vision-agent\"");
        let json = serde_json::to_string(&AgentRole::Planner).unwrap();
        assert_eq!(json, "\"planner\"");
    }

    #[test]
    fn test_start_request_defaults() {
        let req: StartRunRequest =
            serde_json::from_str(r#"{"objective":"observe desktop"}"#).unwrap();
        assert_eq!(req.max_iterations, 25);
        assert_eq!(req.autonomy, AutonomyLevel::Supervised);
        assert!(!req.auto_approve_irreversible);
    }

    #[test]
    fn test_run_status_serde_roundtrip() {
        for status in [
            RunStatus::Running,
            RunStatus::WaitingApproval,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: RunStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
        }
    }
}
