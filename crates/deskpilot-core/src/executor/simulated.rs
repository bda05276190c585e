//! Simulated (no-op) action executor for tests and offline mode.

use serde_json::json;

use deskpilot_types::observation::Observation;
use deskpilot_types::task::TaskAction;

use super::{
    ActionExecutor, ExecutionOutcome, ExecutorStatus, PreflightCheck, PreflightReport,
};

/// Deterministic executor that succeeds on every action.
pub struct SimulatedExecutor;

impl ActionExecutor for SimulatedExecutor {
    fn mode(&self) -> &'static str {
        "simulated"
    }

    async fn execute(
        &self,
        action: &TaskAction,
        objective: &str,
        _observation: Option<&Observation>,
    ) -> ExecutionOutcome {
        ExecutionOutcome::succeeded(json!({
            "executor": "backend-simulated",
            "mode": self.mode(),
            "action": action.action,
            "objective": objective,
            "ok": true,
        }))
    }

    fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            mode: self.mode().to_string(),
            available: true,
            message: "Simulated deterministic executor active.".to_string(),
        }
    }

    async fn preflight(&self) -> PreflightReport {
        PreflightReport {
            mode: self.mode().to_string(),
            ok: true,
            checks: vec![PreflightCheck {
                name: "simulated_mode".to_string(),
                ok: true,
                detail: "Deterministic simulated executor active.".to_string(),
            }],
            message: "Simulated executor ready.".to_string(),
        }
    }
}
