//! Browser-backed executor over the Chrome DevTools Protocol.
//!
//! Requires a browser launched with `--remote-debugging-port`. Targets are
//! discovered over the debug port's HTTP endpoints; each action opens the
//! page's DevTools WebSocket, issues correlated CDP calls, and closes.
//!
//! Supported actions: navigate, click, fill, read_text, screenshot, evaluate.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

use deskpilot_types::observation::Observation;
use deskpilot_types::task::TaskAction;

use super::{
    ActionExecutor, ExecutionOutcome, ExecutorStatus, PreflightCheck, PreflightReport,
};

/// Per-action deadline covering target discovery plus the CDP round trips.
const ACTION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct TargetInfo {
    #[serde(rename = "type", default)]
    target_type: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    web_socket_debugger_url: Option<String>,
}

/// Executor that drives a browser through its remote debugging port.
pub struct BrowserExecutor {
    debug_url: String,
    http: reqwest::Client,
}

impl BrowserExecutor {
    pub fn new(debug_url: impl Into<String>) -> Self {
        let debug_url = debug_url.into().trim_end_matches('/').to_string();
        Self {
            debug_url,
            http: reqwest::Client::new(),
        }
    }

    /// Find the DevTools WebSocket URL of the first page target.
    async fn page_ws_url(&self) -> Result<String, String> {
        let targets: Vec<TargetInfo> = self
            .http
            .get(format!("{}/json/list", self.debug_url))
            .send()
            .await
            .map_err(|e| format!("failed to reach browser debug port: {e}"))?
            .json()
            .await
            .map_err(|e| format!("invalid target list from debug port: {e}"))?;

        targets
            .into_iter()
            .find(|t| t.target_type == "page")
            .and_then(|t| t.web_socket_debugger_url)
            .ok_or_else(|| "no debuggable page target available".to_string())
    }

    async fn run_action(&self, action: &TaskAction) -> Result<Value, String> {
        let name = action.action.trim();
        let params = &action.parameters;
        let param_str = |key: &str| -> String {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .trim()
                .to_string()
        };

        // Classify unknown actions before touching the network so the
        // orchestrator's retry policy sees them as non-retryable.
        if !matches!(
            name,
            "navigate" | "click" | "fill" | "read_text" | "screenshot" | "evaluate"
        ) {
            return Err(format!("unsupported action for browser executor: {name}"));
        }

        let ws_url = self.page_ws_url().await?;
        let mut session = CdpSession::connect(&ws_url).await?;

        match name {
            "navigate" => {
                let url = param_str("url");
                if url.is_empty() {
                    return Err("navigate action requires 'url' parameter".to_string());
                }
                session.call("Page.navigate", json!({"url": url})).await?;
                let title = session.evaluate("document.title").await?;
                Ok(json!({"url": url, "title": title}))
            }
            "click" => {
                let selector = param_str("selector");
                if selector.is_empty() {
                    return Err("click action requires 'selector' parameter".to_string());
                }
                let quoted = js_string(&selector);
                session
                    .evaluate(&format!(
                        "(() => {{ const el = document.querySelector({quoted}); \
                         if (!el) throw new Error('Element not found: ' + {quoted}); \
                         el.click(); return true; }})()"
                    ))
                    .await?;
                Ok(json!({"selector": selector, "clicked": true}))
            }
            "fill" => {
                let selector = param_str("selector");
                if selector.is_empty() {
                    return Err("fill action requires 'selector' parameter".to_string());
                }
                let text = param_str("text");
                let quoted_sel = js_string(&selector);
                let quoted_text = js_string(&text);
                session
                    .evaluate(&format!(
                        "(() => {{ const el = document.querySelector({quoted_sel}); \
                         if (!el) throw new Error('Element not found: ' + {quoted_sel}); \
                         el.value = {quoted_text}; \
                         el.dispatchEvent(new Event('input', {{bubbles: true}})); \
                         return true; }})()"
                    ))
                    .await?;
                Ok(json!({"selector": selector, "text": text, "filled": true}))
            }
            "read_text" => {
                let selector = param_str("selector");
                if selector.is_empty() {
                    return Err("read_text action requires 'selector' parameter".to_string());
                }
                let quoted = js_string(&selector);
                let text = session
                    .evaluate(&format!(
                        "(() => {{ const el = document.querySelector({quoted}); \
                         if (!el) throw new Error('Element not found: ' + {quoted}); \
                         return el.textContent || ''; }})()"
                    ))
                    .await?;
                Ok(json!({"selector": selector, "text": text}))
            }
            "screenshot" => {
                let result = session.call("Page.captureScreenshot", json!({})).await?;
                let data = result
                    .get("data")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(json!({"screenshot_taken": true, "bytes_length": data.len()}))
            }
            "evaluate" => {
                let script = param_str("script");
                if script.is_empty() {
                    return Err("evaluate action requires 'script' parameter".to_string());
                }
                let value = session.evaluate(&script).await?;
                Ok(json!({"script": script, "result": value}))
            }
            other => Err(format!("unsupported action for browser executor: {other}")),
        }
    }
}

impl ActionExecutor for BrowserExecutor {
    fn mode(&self) -> &'static str {
        "browser"
    }

    async fn execute(
        &self,
        action: &TaskAction,
        _objective: &str,
        _observation: Option<&Observation>,
    ) -> ExecutionOutcome {
        let name = action.action.trim().to_string();
        let base = json!({
            "executor": self.mode(),
            "mode": self.mode(),
            "action": name,
            "ok": false,
        });

        let outcome = tokio::time::timeout(ACTION_TIMEOUT, self.run_action(action)).await;
        match outcome {
            Ok(Ok(data)) => {
                let mut result = json!({
                    "executor": self.mode(),
                    "mode": self.mode(),
                    "action": name,
                    "ok": true,
                });
                if let (Value::Object(map), Value::Object(extra)) = (&mut result, data) {
                    map.extend(extra);
                }
                ExecutionOutcome::succeeded(result)
            }
            Ok(Err(reason)) => ExecutionOutcome::failed(reason, base),
            Err(_elapsed) => ExecutionOutcome::failed("browser action timed out", base),
        }
    }

    fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            mode: self.mode().to_string(),
            available: true,
            message: format!(
                "Browser executor configured for {}; targets probed at preflight.",
                self.debug_url
            ),
        }
    }

    async fn preflight(&self) -> PreflightReport {
        let reachable = self
            .http
            .get(format!("{}/json/version", self.debug_url))
            .send()
            .await
            .map(|resp| resp.status().is_success());
        let (ok, detail) = match reachable {
            Ok(true) => (true, "Browser debug port reachable.".to_string()),
            Ok(false) => (false, "Browser debug port returned an error status.".to_string()),
            Err(e) => (false, format!("Browser debug port unreachable: {e}")),
        };
        PreflightReport {
            mode: self.mode().to_string(),
            ok,
            checks: vec![PreflightCheck {
                name: "debug_port_reachable".to_string(),
                ok,
                detail: detail.clone(),
            }],
            message: detail,
        }
    }
}

/// Quote a string as a JavaScript literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

// ---------------------------------------------------------------------------
// CDP session
// ---------------------------------------------------------------------------

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// One DevTools WebSocket with id-correlated request/response calls.
struct CdpSession {
    ws: WsStream,
    next_id: u64,
}

impl CdpSession {
    async fn connect(url: &str) -> Result<Self, String> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| format!("failed to open DevTools socket: {e}"))?;
        Ok(Self { ws, next_id: 1 })
    }

    /// Issue one CDP method call and wait for its correlated response,
    /// skipping interleaved protocol events.
    async fn call(&mut self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id;
        self.next_id += 1;

        let frame = json!({"id": id, "method": method, "params": params});
        self.ws
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| format!("DevTools send failed: {e}"))?;

        while let Some(message) = self.ws.next().await {
            let message = message.map_err(|e| format!("DevTools receive failed: {e}"))?;
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            if value.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = value.get("error") {
                let msg = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown DevTools error");
                return Err(format!("{method} failed: {msg}"));
            }
            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
        Err("DevTools socket closed before response".to_string())
    }

    /// Evaluate a JavaScript expression in the page, returning its value.
    async fn evaluate(&mut self, expression: &str) -> Result<Value, String> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let msg = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.pointer("/text").and_then(Value::as_str))
                .unwrap_or("script threw an exception");
            return Err(msg.to_string());
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string("a\"b"), r#""a\"b""#);
        assert_eq!(js_string("plain"), "\"plain\"");
    }

    #[test]
    fn debug_url_is_normalized() {
        let executor = BrowserExecutor::new("http://127.0.0.1:9222/");
        assert_eq!(executor.debug_url, "http://127.0.0.1:9222");
    }

    #[tokio::test]
    async fn unsupported_action_is_classified_before_connecting() {
        // Nothing listens on this port; an unknown action must still fail
        // with the unsupported-action marker, not a connection error.
        let executor = BrowserExecutor::new("http://127.0.0.1:1");
        let action = TaskAction::new("hover", "hover something");
        let outcome = executor.execute(&action, "objective", None).await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("unsupported action"));
        assert_eq!(outcome.result["executor"], "browser");
    }

    #[tokio::test]
    async fn preflight_reports_unreachable_port() {
        let executor = BrowserExecutor::new("http://127.0.0.1:1");
        let report = executor.preflight().await;
        assert!(!report.ok);
        assert_eq!(report.checks[0].name, "debug_port_reachable");
    }
}
