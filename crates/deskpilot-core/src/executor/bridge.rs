//! Bridge-backed executor: maps task actions onto collector commands.
//!
//! The planner's action vocabulary is broader than the collector's command
//! set, so an alias map folds related names onto the concrete commands the
//! collector understands before dispatching through the [`CommandBridge`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use deskpilot_types::observation::Observation;
use deskpilot_types::task::TaskAction;

use crate::bridge::CommandBridge;

use super::{ActionExecutor, ExecutionOutcome, ExecutorStatus, PreflightReport};

/// Executor that dispatches actions to the collector over the command bridge.
pub struct BridgeExecutor {
    bridge: Arc<CommandBridge>,
    timeout: Duration,
}

impl BridgeExecutor {
    pub fn new(bridge: Arc<CommandBridge>, timeout: Duration) -> Self {
        Self {
            bridge,
            timeout: timeout.max(Duration::from_millis(1)),
        }
    }

    /// Resolve a task action to the collector command name and parameters.
    ///
    /// Returns `None` when the action cannot be dispatched (e.g. compose
    /// with no text to type).
    fn resolve(
        action: &TaskAction,
    ) -> Result<(String, HashMap<String, Value>), String> {
        let name = action.action.trim();
        let params = action.parameters.clone();
        match name {
            "observe_desktop" | "verify_outcome" => Ok(("observe".to_string(), HashMap::new())),
            "open_application" => {
                let mut mapped = HashMap::new();
                mapped.insert(
                    "application".to_string(),
                    params.get("application").cloned().unwrap_or(json!("")),
                );
                Ok(("open_application".to_string(), mapped))
            }
            "send_keys" | "focus_search" | "send_or_submit" => {
                let mut mapped = HashMap::new();
                mapped.insert(
                    "keys".to_string(),
                    params.get("keys").cloned().unwrap_or(json!("")),
                );
                Ok(("send_keys".to_string(), mapped))
            }
            "compose_text" => {
                let text = params
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if text.is_empty() {
                    return Err("no text to compose".to_string());
                }
                let mut mapped = HashMap::new();
                mapped.insert("text".to_string(), json!(text));
                Ok(("type_text".to_string(), mapped))
            }
            "click" | "type_text" | "focus_window" => Ok((name.to_string(), params)),
            // Unknown names are forwarded verbatim; the collector decides.
            other => Ok((other.to_string(), params)),
        }
    }

    fn base_result(&self, action: &str) -> Value {
        json!({
            "executor": self.mode_name(),
            "action": action,
            "ok": false,
        })
    }

    fn mode_name(&self) -> &'static str {
        "bridge"
    }
}

impl ActionExecutor for BridgeExecutor {
    fn mode(&self) -> &'static str {
        self.mode_name()
    }

    async fn execute(
        &self,
        action: &TaskAction,
        _objective: &str,
        _observation: Option<&Observation>,
    ) -> ExecutionOutcome {
        let name = action.action.trim().to_string();
        if !self.bridge.connected() {
            return ExecutionOutcome::failed(
                "bridge not connected to collector",
                self.base_result(&name),
            );
        }

        let (command, params) = match Self::resolve(action) {
            Ok(resolved) => resolved,
            Err(reason) => {
                return ExecutionOutcome::failed(reason, self.base_result(&name));
            }
        };

        let reply = match self
            .bridge
            .execute(&command, params, Some(self.timeout))
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                return ExecutionOutcome::failed(err.to_string(), self.base_result(&name));
            }
        };

        let result = json!({
            "executor": self.mode_name(),
            "action": name,
            "ok": reply.ok,
            "bridge_result": reply.result,
            "screenshot_available": reply.screenshot_b64.is_some(),
        });
        if reply.ok {
            ExecutionOutcome::succeeded(result)
        } else {
            ExecutionOutcome::failed(
                reply
                    .error
                    .unwrap_or_else(|| "collector reported failure".to_string()),
                result,
            )
        }
    }

    fn status(&self) -> ExecutorStatus {
        let connected = self.bridge.connected();
        ExecutorStatus {
            mode: self.mode_name().to_string(),
            available: connected,
            message: if connected {
                "Bridge executor connected.".to_string()
            } else {
                "Bridge executor: collector not connected.".to_string()
            },
        }
    }

    async fn preflight(&self) -> PreflightReport {
        PreflightReport::from_status(&self.status())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_types::wire::{CommandEnvelope, CommandResult};
    use tokio::sync::mpsc;

    fn executor_with_channel() -> (BridgeExecutor, mpsc::Receiver<CommandEnvelope>) {
        let bridge = Arc::new(CommandBridge::new(Duration::from_secs(1)));
        let (tx, rx) = mpsc::channel(8);
        bridge.attach(tx);
        (
            BridgeExecutor::new(bridge, Duration::from_secs(1)),
            rx,
        )
    }

    fn answer(envelope: &CommandEnvelope, ok: bool, error: Option<&str>) -> CommandResult {
        CommandResult {
            command_id: envelope.command_id,
            ok,
            result: Some(json!({"window": "Inbox"})),
            error: error.map(str::to_string),
            screenshot_b64: None,
        }
    }

    #[tokio::test]
    async fn disconnected_bridge_fails_without_dispatch() {
        let bridge = Arc::new(CommandBridge::new(Duration::from_secs(1)));
        let executor = BridgeExecutor::new(bridge, Duration::from_secs(1));
        let action = TaskAction::new("observe_desktop", "observe");
        let outcome = executor.execute(&action, "objective", None).await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("not connected"));
        assert_eq!(outcome.result["executor"], "bridge");
        assert_eq!(outcome.result["ok"], false);
    }

    #[tokio::test]
    async fn observe_aliases_route_to_observe_command() {
        for name in ["observe_desktop", "verify_outcome"] {
            let (executor, mut rx) = executor_with_channel();
            let action = TaskAction::new(name, "look");
            let responder = async {
                let envelope = rx.recv().await.unwrap();
                assert_eq!(envelope.action, "observe");
                executor.bridge.handle_incoming(answer(&envelope, true, None));
            };
            let (outcome, ()) =
                tokio::join!(executor.execute(&action, "objective", None), responder);
            assert!(outcome.ok);
            assert_eq!(outcome.result["action"], name);
            assert_eq!(outcome.result["bridge_result"]["window"], "Inbox");
        }
    }

    #[tokio::test]
    async fn submit_aliases_route_to_send_keys() {
        let (executor, mut rx) = executor_with_channel();
        let action = TaskAction::new("send_or_submit", "send it")
            .with_parameter("keys", json!("^{ENTER}"));
        let responder = async {
            let envelope = rx.recv().await.unwrap();
            assert_eq!(envelope.action, "send_keys");
            assert_eq!(envelope.parameters["keys"], "^{ENTER}");
            executor.bridge.handle_incoming(answer(&envelope, true, None));
        };
        let (outcome, ()) = tokio::join!(executor.execute(&action, "objective", None), responder);
        assert!(outcome.ok);
    }

    #[tokio::test]
    async fn compose_without_text_fails() {
        let (executor, _rx) = executor_with_channel();
        let action = TaskAction::new("compose_text", "draft reply");
        let outcome = executor.execute(&action, "objective", None).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error.unwrap(), "no text to compose");
    }

    #[tokio::test]
    async fn collector_failure_surfaces_error() {
        let (executor, mut rx) = executor_with_channel();
        let action = TaskAction::new("click", "click the button");
        let responder = async {
            let envelope = rx.recv().await.unwrap();
            executor
                .bridge
                .handle_incoming(answer(&envelope, false, Some("element not found")));
        };
        let (outcome, ()) = tokio::join!(executor.execute(&action, "objective", None), responder);
        assert!(!outcome.ok);
        assert_eq!(outcome.error.unwrap(), "element not found");
        assert_eq!(outcome.result["ok"], false);
    }

    #[tokio::test]
    async fn status_tracks_bridge_connection() {
        let bridge = Arc::new(CommandBridge::new(Duration::from_secs(1)));
        let executor = BridgeExecutor::new(bridge.clone(), Duration::from_secs(1));
        assert!(!executor.status().available);

        let (tx, _rx) = mpsc::channel(8);
        bridge.attach(tx);
        assert!(executor.status().available);
        assert!(executor.preflight().await.ok);
    }
}
