//! Action executors.
//!
//! An executor takes one abstract [`TaskAction`] plus the task objective and
//! the latest desktop [`Observation`], performs it against its target, and
//! reports a structured outcome. Executors never mutate shared backend
//! state; failures are data (`ok = false`), not panics.
//!
//! Variants: simulated (tests/offline), bridge-backed (collector commands),
//! and browser-backed (DevTools debug port). The factory's `auto` mode picks
//! by platform and bridge availability.

pub mod bridge;
pub mod browser;
pub mod simulated;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use deskpilot_types::config::{ExecutorMode, RunControlConfig};
use deskpilot_types::observation::Observation;
use deskpilot_types::task::TaskAction;

use crate::bridge::CommandBridge;

// ---------------------------------------------------------------------------
// Outcome and status types
// ---------------------------------------------------------------------------

/// Structured result of one action dispatch.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub ok: bool,
    /// Result mapping; always carries at least `executor`, `action`, `ok`.
    pub result: Value,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(result: Value) -> Self {
        Self {
            ok: true,
            result,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, result: Value) -> Self {
        Self {
            ok: false,
            result,
            error: Some(error.into()),
        }
    }

    /// Stamp the attempt count into the result mapping.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        if let Value::Object(map) = &mut self.result {
            map.insert("attempts".to_string(), json!(attempts));
        }
        self
    }
}

/// Cheap synchronous health snapshot of an executor.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStatus {
    pub mode: String,
    pub available: bool,
    pub message: String,
}

/// One named preflight check.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

/// Result of probing an executor before a run.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub mode: String,
    pub ok: bool,
    pub checks: Vec<PreflightCheck>,
    pub message: String,
}

impl PreflightReport {
    /// Derive a preflight report from a status snapshot; executors without
    /// a deeper probe use this.
    pub fn from_status(status: &ExecutorStatus) -> Self {
        let ok = status.available || status.mode == "simulated";
        Self {
            mode: status.mode.clone(),
            ok,
            checks: vec![PreflightCheck {
                name: "executor_available".to_string(),
                ok,
                detail: status.message.clone(),
            }],
            message: status.message.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionExecutor trait
// ---------------------------------------------------------------------------

/// Capability set every executor variant implements.
///
/// Uses RPITIT for async methods; [`BoxActionExecutor`] provides the
/// object-safe wrapper for runtime variant selection.
pub trait ActionExecutor: Send + Sync {
    fn mode(&self) -> &'static str;

    /// Perform one action. Infallible at the signature level: every failure
    /// is carried in the outcome so callers can apply retry classification.
    fn execute(
        &self,
        action: &TaskAction,
        objective: &str,
        observation: Option<&Observation>,
    ) -> impl Future<Output = ExecutionOutcome> + Send;

    fn status(&self) -> ExecutorStatus;

    fn preflight(&self) -> impl Future<Output = PreflightReport> + Send;
}

// ---------------------------------------------------------------------------
// Object-safe wrapper
// ---------------------------------------------------------------------------

/// Object-safe version of [`ActionExecutor`] with boxed futures.
///
/// Exists solely for dynamic dispatch; a blanket implementation covers all
/// `ActionExecutor` types.
pub trait ActionExecutorDyn: Send + Sync {
    fn mode(&self) -> &'static str;

    fn execute_boxed<'a>(
        &'a self,
        action: &'a TaskAction,
        objective: &'a str,
        observation: Option<&'a Observation>,
    ) -> Pin<Box<dyn Future<Output = ExecutionOutcome> + Send + 'a>>;

    fn status(&self) -> ExecutorStatus;

    fn preflight_boxed(&self) -> Pin<Box<dyn Future<Output = PreflightReport> + Send + '_>>;
}

impl<T: ActionExecutor> ActionExecutorDyn for T {
    fn mode(&self) -> &'static str {
        ActionExecutor::mode(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        action: &'a TaskAction,
        objective: &'a str,
        observation: Option<&'a Observation>,
    ) -> Pin<Box<dyn Future<Output = ExecutionOutcome> + Send + 'a>> {
        Box::pin(self.execute(action, objective, observation))
    }

    fn status(&self) -> ExecutorStatus {
        ActionExecutor::status(self)
    }

    fn preflight_boxed(&self) -> Pin<Box<dyn Future<Output = PreflightReport> + Send + '_>> {
        Box::pin(self.preflight())
    }
}

/// Type-erased executor handle held by the orchestrator.
#[derive(Clone)]
pub struct BoxActionExecutor {
    inner: Arc<dyn ActionExecutorDyn>,
}

impl std::fmt::Debug for BoxActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxActionExecutor")
            .field("mode", &self.inner.mode())
            .finish()
    }
}

impl BoxActionExecutor {
    pub fn new(executor: impl ActionExecutor + 'static) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub fn mode(&self) -> &'static str {
        self.inner.mode()
    }

    pub async fn execute(
        &self,
        action: &TaskAction,
        objective: &str,
        observation: Option<&Observation>,
    ) -> ExecutionOutcome {
        self.inner.execute_boxed(action, objective, observation).await
    }

    pub fn status(&self) -> ExecutorStatus {
        self.inner.status()
    }

    pub async fn preflight(&self) -> PreflightReport {
        self.inner.preflight_boxed().await
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Errors constructing an executor from configuration.
#[derive(Debug, Error)]
pub enum ExecutorBuildError {
    #[error("executor mode 'bridge' requires a collector bridge")]
    BridgeRequired,
}

/// Build the executor variant selected by configuration.
///
/// `auto` prefers the bridge whenever one is configured, even if it is not
/// currently connected -- runtime disconnects are reported per-dispatch.
/// Without a bridge, `auto` falls back to the simulated executor.
pub fn build_action_executor(
    config: &RunControlConfig,
    bridge: Option<Arc<CommandBridge>>,
) -> Result<BoxActionExecutor, ExecutorBuildError> {
    let timeout = std::time::Duration::from_millis(config.executor_bridge_timeout_ms.max(1));
    match config.action_executor_mode {
        ExecutorMode::Simulated => Ok(BoxActionExecutor::new(simulated::SimulatedExecutor)),
        ExecutorMode::Bridge => {
            let bridge = bridge.ok_or(ExecutorBuildError::BridgeRequired)?;
            Ok(BoxActionExecutor::new(bridge::BridgeExecutor::new(
                bridge, timeout,
            )))
        }
        ExecutorMode::Browser => Ok(BoxActionExecutor::new(browser::BrowserExecutor::new(
            config.browser_debug_url.clone(),
        ))),
        ExecutorMode::Auto => match bridge {
            Some(bridge) => Ok(BoxActionExecutor::new(bridge::BridgeExecutor::new(
                bridge, timeout,
            ))),
            None => Ok(BoxActionExecutor::new(simulated::SimulatedExecutor)),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_attempt_stamping() {
        let outcome =
            ExecutionOutcome::succeeded(json!({"executor": "simulated", "ok": true})).with_attempts(2);
        assert_eq!(outcome.result["attempts"], 2);
    }

    #[test]
    fn preflight_from_status_respects_availability() {
        let report = PreflightReport::from_status(&ExecutorStatus {
            mode: "bridge".to_string(),
            available: false,
            message: "collector not connected".to_string(),
        });
        assert!(!report.ok);
        assert_eq!(report.checks.len(), 1);
        assert!(!report.checks[0].ok);

        // Simulated mode is always preflight-ok.
        let report = PreflightReport::from_status(&ExecutorStatus {
            mode: "simulated".to_string(),
            available: true,
            message: String::new(),
        });
        assert!(report.ok);
    }

    #[test]
    fn factory_explicit_bridge_without_bridge_is_an_error() {
        let mut config = RunControlConfig::default();
        config.action_executor_mode = ExecutorMode::Bridge;
        let err = build_action_executor(&config, None).unwrap_err();
        assert!(matches!(err, ExecutorBuildError::BridgeRequired));
    }

    #[test]
    fn factory_auto_prefers_bridge_even_when_disconnected() {
        let mut config = RunControlConfig::default();
        config.action_executor_mode = ExecutorMode::Auto;
        let bridge = Arc::new(CommandBridge::new(std::time::Duration::from_secs(1)));
        let executor = build_action_executor(&config, Some(bridge)).unwrap();
        assert_eq!(executor.mode(), "bridge");
    }

    #[test]
    fn factory_auto_without_bridge_is_simulated() {
        let config = RunControlConfig::default();
        let executor = build_action_executor(&config, None).unwrap();
        assert_eq!(executor.mode(), "simulated");
    }
}
