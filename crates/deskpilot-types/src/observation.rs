//! Desktop events and observations.
//!
//! The collector streams [`DesktopEvent`]s over the ingest WebSocket. The
//! state store keeps a ring of recent events; [`Observation`] is the
//! executor-facing snapshot derived from the latest foreground event when a
//! step begins.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Collector events
// ---------------------------------------------------------------------------

/// Kind of collector event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Foreground window changed.
    Foreground,
    /// User went idle.
    Idle,
    /// User became active again.
    Active,
    #[serde(other)]
    Other,
}

fn default_kind() -> EventKind {
    EventKind::Foreground
}

fn default_source() -> String {
    "collector".to_string()
}

/// One event as delivered by the on-host collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopEvent {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: EventKind,
    /// Native window handle, formatted by the collector.
    #[serde(default)]
    pub hwnd: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub process_exe: String,
    #[serde(default)]
    pub pid: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_source")]
    pub source: String,
    /// Milliseconds the user has been idle (idle events only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
    /// Accessibility-tree summary text captured with the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uia_summary: Option<String>,
    /// Base64-encoded screenshot, when the collector captured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_b64: Option<String>,
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Snapshot of the desktop at the moment a step begins.
///
/// Built by the state store from its current event; consumed by action
/// executors that want context about the target window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub window_title: String,
    pub process_exe: String,
    pub timestamp: DateTime<Utc>,
    pub uia_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_b64: Option<String>,
}

impl Observation {
    pub fn from_event(event: &DesktopEvent) -> Self {
        Self {
            window_title: event.title.clone(),
            process_exe: event.process_exe.clone(),
            timestamp: event.timestamp,
            uia_summary: event.uia_summary.clone().unwrap_or_default(),
            screenshot_b64: event.screenshot_b64.clone(),
        }
    }

    /// Render the observation as prompt context for a planner or composer.
    pub fn to_prompt(&self) -> String {
        let mut parts = vec![format!("Window: {}", self.window_title)];
        if !self.process_exe.is_empty() {
            parts.push(format!("Process: {}", self.process_exe));
        }
        if !self.uia_summary.is_empty() {
            parts.push(format!("UI Elements:\n{}", self.uia_summary));
        }
        if self.screenshot_b64.is_some() {
            parts.push("[Screenshot available]".to_string());
        }
        parts.join("\n")
    }

    /// Decode the screenshot, if present and valid base64.
    pub fn screenshot_bytes(&self) -> Option<Vec<u8>> {
        let encoded = self.screenshot_b64.as_deref()?;
        base64::engine::general_purpose::STANDARD.decode(encoded).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> DesktopEvent {
        DesktopEvent {
            kind: EventKind::Foreground,
            hwnd: "0x1234".to_string(),
            title: "Outlook - Inbox".to_string(),
            process_exe: "outlook.exe".to_string(),
            pid: 100,
            timestamp: Utc::now(),
            source: "collector".to_string(),
            idle_ms: None,
            uia_summary: Some("Focused: Reply".to_string()),
            screenshot_b64: None,
        }
    }

    #[test]
    fn test_event_parses_with_defaults() {
        let json = r#"{"hwnd":"0x1","timestamp":"2025-06-01T12:00:00Z"}"#;
        let event: DesktopEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, EventKind::Foreground);
        assert_eq!(event.source, "collector");
        assert_eq!(event.pid, 0);
        assert!(event.uia_summary.is_none());
    }

    #[test]
    fn test_unknown_event_kind_maps_to_other() {
        let json = r#"{"type":"heartbeat","timestamp":"2025-06-01T12:00:00Z"}"#;
        let event: DesktopEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, EventKind::Other);
    }

    #[test]
    fn test_observation_from_event() {
        let obs = Observation::from_event(&sample_event());
        assert_eq!(obs.window_title, "Outlook - Inbox");
        assert_eq!(obs.process_exe, "outlook.exe");
        assert_eq!(obs.uia_summary, "Focused: Reply");
    }

    #[test]
    fn test_observation_prompt_includes_context() {
        let obs = Observation::from_event(&sample_event());
        let prompt = obs.to_prompt();
        assert!(prompt.contains("Window: Outlook - Inbox"));
        assert!(prompt.contains("Process: outlook.exe"));
        assert!(prompt.contains("UI Elements:"));
        assert!(!prompt.contains("Screenshot"));
    }

    #[test]
    fn test_screenshot_decode() {
        let mut event = sample_event();
        event.screenshot_b64 = Some(base64::engine::general_purpose::STANDARD.encode(b"png"));
        let obs = Observation::from_event(&event);
        assert_eq!(obs.screenshot_bytes().unwrap(), b"png");

        let mut bad = sample_event();
        bad.screenshot_b64 = Some("!!not base64!!".to_string());
        assert!(Observation::from_event(&bad).screenshot_bytes().is_none());
    }
}
