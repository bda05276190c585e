//! Wire protocol between backend and collector.
//!
//! The collector holds a single duplex WebSocket. Outgoing traffic is
//! [`CommandEnvelope`] frames; incoming traffic is either a correlated
//! [`CommandResult`] or a [`DesktopEvent`], discriminated by the `type`
//! field.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::observation::DesktopEvent;

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

/// One command sent to the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Always `"command"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Correlation identifier echoed back in the result.
    pub command_id: Uuid,
    pub action: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    pub timeout_ms: u64,
}

impl CommandEnvelope {
    pub fn new(
        command_id: Uuid,
        action: impl Into<String>,
        parameters: HashMap<String, serde_json::Value>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            kind: "command".to_string(),
            command_id,
            action: action.into(),
            parameters,
            timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// Result of one collector command, correlated by `command_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: Uuid,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub screenshot_b64: Option<String>,
}

/// Any message the collector can send on the ingest socket.
#[derive(Debug, Clone)]
pub enum CollectorMessage {
    CommandResult(CommandResult),
    Event(DesktopEvent),
}

impl CollectorMessage {
    /// Discriminate on the `type` field: `command_result` frames route to
    /// the bridge, everything else parses as a desktop event.
    pub fn parse(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if kind == "command_result" {
            Ok(CollectorMessage::CommandResult(serde_json::from_value(
                value,
            )?))
        } else {
            Ok(CollectorMessage::Event(serde_json::from_value(value)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_envelope_wire_shape() {
        let id = Uuid::now_v7();
        let envelope = CommandEnvelope::new(id, "observe", HashMap::new(), 10_000);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["action"], "observe");
        assert_eq!(value["command_id"], json!(id.to_string()));
        assert_eq!(value["timeout_ms"], 10_000);
    }

    #[test]
    fn test_parse_command_result() {
        let id = Uuid::now_v7();
        let msg = CollectorMessage::parse(json!({
            "type": "command_result",
            "command_id": id.to_string(),
            "ok": true,
            "result": {"window": "Inbox"},
        }))
        .unwrap();
        match msg {
            CollectorMessage::CommandResult(result) => {
                assert_eq!(result.command_id, id);
                assert!(result.ok);
                assert!(result.error.is_none());
            }
            CollectorMessage::Event(_) => panic!("expected command result"),
        }
    }

    #[test]
    fn test_parse_foreground_event() {
        let msg = CollectorMessage::parse(json!({
            "type": "foreground",
            "hwnd": "0x42",
            "title": "Notepad",
            "timestamp": "2025-06-01T12:00:00Z",
        }))
        .unwrap();
        match msg {
            CollectorMessage::Event(event) => assert_eq!(event.title, "Notepad"),
            CollectorMessage::CommandResult(_) => panic!("expected event"),
        }
    }

    #[test]
    fn test_parse_rejects_malformed_event() {
        // Missing timestamp
        let result = CollectorMessage::parse(json!({"type": "foreground"}));
        assert!(result.is_err());
    }
}
