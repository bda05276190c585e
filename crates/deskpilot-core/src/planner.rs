//! Objective planners.
//!
//! A planner turns a free-text objective into an ordered step list for the
//! orchestrator. The deterministic planner synthesizes plans from keyword
//! heuristics and is the fallback for every configuration; richer planners
//! (LLM-backed) plug in behind the same trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use deskpilot_types::task::{StepPlan, TaskAction};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner failed: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Planner trait
// ---------------------------------------------------------------------------

/// Produces a step list for an objective.
pub trait Planner: Send + Sync {
    /// Short tag recorded on each run (e.g. "deterministic").
    fn mode(&self) -> &'static str;

    fn build_plan(
        &self,
        objective: &str,
    ) -> impl Future<Output = Result<Vec<StepPlan>, PlanError>> + Send;
}

/// Object-safe version of [`Planner`] with boxed futures.
pub trait PlannerDyn: Send + Sync {
    fn mode(&self) -> &'static str;

    fn build_plan_boxed<'a>(
        &'a self,
        objective: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StepPlan>, PlanError>> + Send + 'a>>;
}

impl<T: Planner> PlannerDyn for T {
    fn mode(&self) -> &'static str {
        Planner::mode(self)
    }

    fn build_plan_boxed<'a>(
        &'a self,
        objective: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StepPlan>, PlanError>> + Send + 'a>> {
        Box::pin(self.build_plan(objective))
    }
}

/// Type-erased planner handle held by the autonomy runner.
#[derive(Clone)]
pub struct BoxPlanner {
    inner: Arc<dyn PlannerDyn>,
}

impl BoxPlanner {
    pub fn new(planner: impl Planner + 'static) -> Self {
        Self {
            inner: Arc::new(planner),
        }
    }

    pub fn mode(&self) -> &'static str {
        self.inner.mode()
    }

    pub async fn build_plan(&self, objective: &str) -> Result<Vec<StepPlan>, PlanError> {
        self.inner.build_plan_boxed(objective).await
    }
}

// ---------------------------------------------------------------------------
// Deterministic planner
// ---------------------------------------------------------------------------

/// Keywords that imply an external side effect the operator must gate.
const IRREVERSIBLE_KEYWORDS: [&str; 7] = [
    "send", "submit", "delete", "publish", "transfer", "buy", "purchase",
];

/// Keyword-driven planner: observe, act by objective hints, verify.
pub struct DeterministicPlanner;

impl DeterministicPlanner {
    fn contains_irreversible_action(text: &str) -> bool {
        IRREVERSIBLE_KEYWORDS.iter().any(|word| text.contains(word))
    }
}

impl Planner for DeterministicPlanner {
    fn mode(&self) -> &'static str {
        "deterministic"
    }

    async fn build_plan(&self, objective: &str) -> Result<Vec<StepPlan>, PlanError> {
        let text = objective.to_lowercase();
        let mut steps = vec![StepPlan {
            action: TaskAction::new(
                "observe_desktop",
                "Capture desktop context and active target.",
            ),
            preconditions: vec!["runtime connected".to_string()],
            postconditions: vec!["context snapshot captured".to_string()],
        }];

        if text.contains("outlook") || text.contains("email") || text.contains("mail") {
            steps.push(StepPlan {
                action: TaskAction::new(
                    "open_application",
                    "Open Outlook and bring it to foreground.",
                )
                .with_parameter("application", json!("Outlook")),
                preconditions: vec!["desktop unlocked".to_string()],
                postconditions: vec!["outlook focused".to_string()],
            });
        }

        if text.contains("search") {
            steps.push(StepPlan {
                action: TaskAction::new("focus_search", "Focus search input for current app."),
                preconditions: vec!["target app focused".to_string()],
                postconditions: vec!["search field focused".to_string()],
            });
        }

        if text.contains("reply") || text.contains("draft") || text.contains("type") {
            steps.push(StepPlan {
                action: TaskAction::new("compose_text", "Generate and type response draft."),
                preconditions: vec!["editable compose field available".to_string()],
                postconditions: vec!["draft text present".to_string()],
            });
        }

        if Self::contains_irreversible_action(&text) {
            steps.push(StepPlan {
                action: TaskAction::new("send_or_submit", "Execute irreversible action.")
                    .irreversible(),
                preconditions: vec!["review checkpoint passed".to_string()],
                postconditions: vec!["external side effect acknowledged".to_string()],
            });
        }

        steps.push(StepPlan {
            action: TaskAction::new(
                "verify_outcome",
                "Verify objective completion and finalize task.",
            ),
            preconditions: vec!["all prior steps executed".to_string()],
            postconditions: vec!["objective completed".to_string()],
        });

        Ok(steps)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn minimal_objective_observes_and_verifies() {
        let plan = DeterministicPlanner
            .build_plan("watch the desktop")
            .await
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].action.action, "observe_desktop");
        assert_eq!(plan[1].action.action, "verify_outcome");
        assert!(plan.iter().all(|s| !s.action.irreversible));
    }

    #[tokio::test]
    async fn email_objective_opens_outlook() {
        let plan = DeterministicPlanner
            .build_plan("Check email for updates")
            .await
            .unwrap();
        let actions: Vec<&str> = plan.iter().map(|s| s.action.action.as_str()).collect();
        assert!(actions.contains(&"open_application"));
        let open = plan
            .iter()
            .find(|s| s.action.action == "open_application")
            .unwrap();
        assert_eq!(open.action.parameters["application"], "Outlook");
    }

    #[tokio::test]
    async fn send_objective_inserts_irreversible_gate() {
        let plan = DeterministicPlanner
            .build_plan("Open outlook, draft reply, then send email")
            .await
            .unwrap();
        let actions: Vec<&str> = plan.iter().map(|s| s.action.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![
                "observe_desktop",
                "open_application",
                "compose_text",
                "send_or_submit",
                "verify_outcome",
            ]
        );
        let gate = plan
            .iter()
            .find(|s| s.action.action == "send_or_submit")
            .unwrap();
        assert!(gate.action.irreversible);
    }

    #[tokio::test]
    async fn box_planner_preserves_mode() {
        let planner = BoxPlanner::new(DeterministicPlanner);
        assert_eq!(planner.mode(), "deterministic");
        let plan = planner.build_plan("search for invoices").await.unwrap();
        assert!(
            plan.iter()
                .any(|s| s.action.action == "focus_search")
        );
    }
}
