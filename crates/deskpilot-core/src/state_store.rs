//! In-memory desktop state.
//!
//! Keeps a bounded ring of recent collector events, the current foreground
//! event, the idle flag, and an optional session summary. The contract is
//! "latest wins": readers get whatever the most recent write left behind.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use deskpilot_types::observation::{DesktopEvent, EventKind, Observation};

struct StoreInner {
    events: VecDeque<DesktopEvent>,
    current: Option<DesktopEvent>,
    idle: bool,
    idle_since: Option<DateTime<Utc>>,
    summary: Option<String>,
}

/// Ring of recent observations plus the current desktop state.
pub struct StateStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

impl StateStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                events: VecDeque::with_capacity(capacity.min(1024)),
                current: None,
                idle: false,
                idle_since: None,
                summary: None,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Record one collector event, updating current/idle state as needed.
    pub async fn record(&self, event: DesktopEvent) {
        let mut inner = self.inner.lock().await;
        match event.kind {
            EventKind::Foreground => inner.current = Some(event.clone()),
            EventKind::Idle => {
                inner.idle = true;
                inner.idle_since = Some(event.timestamp);
            }
            EventKind::Active => {
                inner.idle = false;
                inner.idle_since = None;
            }
            EventKind::Other => {}
        }
        if inner.events.len() == self.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(event);
    }

    pub async fn current(&self) -> Option<DesktopEvent> {
        self.inner.lock().await.current.clone()
    }

    /// Current event plus the whole ring, in arrival order.
    pub async fn snapshot(&self) -> (Option<DesktopEvent>, Vec<DesktopEvent>) {
        let inner = self.inner.lock().await;
        (inner.current.clone(), inner.events.iter().cloned().collect())
    }

    /// The most recent `limit` events, oldest first.
    pub async fn events(&self, limit: Option<usize>) -> Vec<DesktopEvent> {
        let inner = self.inner.lock().await;
        let items: Vec<DesktopEvent> = inner.events.iter().cloned().collect();
        match limit {
            None => items,
            Some(0) => Vec::new(),
            Some(n) => items[items.len().saturating_sub(n)..].to_vec(),
        }
    }

    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    pub async fn idle_state(&self) -> (bool, Option<DateTime<Utc>>) {
        let inner = self.inner.lock().await;
        (inner.idle, inner.idle_since)
    }

    pub async fn set_summary(&self, summary: Option<String>) {
        self.inner.lock().await.summary = summary;
    }

    pub async fn summary(&self) -> Option<String> {
        self.inner.lock().await.summary.clone()
    }

    /// Executor-facing snapshot built from the current foreground event.
    pub async fn observation(&self) -> Option<Observation> {
        self.inner
            .lock()
            .await
            .current
            .as_ref()
            .map(Observation::from_event)
    }

    /// Restore state from durable storage at startup.
    pub async fn hydrate(
        &self,
        current: Option<DesktopEvent>,
        events: Vec<DesktopEvent>,
        idle: bool,
        idle_since: Option<DateTime<Utc>>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.current = current;
        inner.events = events
            .into_iter()
            .rev()
            .take(self.capacity)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        inner.idle = idle;
        inner.idle_since = idle_since;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, title: &str) -> DesktopEvent {
        DesktopEvent {
            kind,
            hwnd: "0x1".to_string(),
            title: title.to_string(),
            process_exe: "app.exe".to_string(),
            pid: 1,
            timestamp: Utc::now(),
            source: "collector".to_string(),
            idle_ms: None,
            uia_summary: None,
            screenshot_b64: None,
        }
    }

    #[tokio::test]
    async fn ring_drops_oldest_beyond_capacity() {
        let store = StateStore::new(3);
        for i in 0..5 {
            store
                .record(event(EventKind::Foreground, &format!("win-{i}")))
                .await;
        }
        let events = store.events(None).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].title, "win-2");
        assert_eq!(events[2].title, "win-4");
        assert_eq!(store.event_count().await, 3);
    }

    #[tokio::test]
    async fn current_tracks_latest_foreground_only() {
        let store = StateStore::new(10);
        store.record(event(EventKind::Foreground, "first")).await;
        store.record(event(EventKind::Idle, "")).await;
        let current = store.current().await.unwrap();
        assert_eq!(current.title, "first");

        store.record(event(EventKind::Foreground, "second")).await;
        assert_eq!(store.current().await.unwrap().title, "second");
    }

    #[tokio::test]
    async fn idle_flag_follows_idle_and_active_events() {
        let store = StateStore::new(10);
        assert_eq!(store.idle_state().await, (false, None));

        let mut idle = event(EventKind::Idle, "");
        idle.idle_ms = Some(60_000);
        let ts = idle.timestamp;
        store.record(idle).await;
        assert_eq!(store.idle_state().await, (true, Some(ts)));

        store.record(event(EventKind::Active, "")).await;
        assert_eq!(store.idle_state().await, (false, None));
    }

    #[tokio::test]
    async fn observation_derives_from_current() {
        let store = StateStore::new(10);
        assert!(store.observation().await.is_none());

        let mut fg = event(EventKind::Foreground, "Outlook - Inbox");
        fg.uia_summary = Some("Focused: Reply".to_string());
        store.record(fg).await;

        let obs = store.observation().await.unwrap();
        assert_eq!(obs.window_title, "Outlook - Inbox");
        assert_eq!(obs.uia_summary, "Focused: Reply");
    }

    #[tokio::test]
    async fn events_limit_clamps() {
        let store = StateStore::new(10);
        for i in 0..4 {
            store
                .record(event(EventKind::Foreground, &format!("win-{i}")))
                .await;
        }
        assert_eq!(store.events(Some(2)).await.len(), 2);
        assert_eq!(store.events(Some(0)).await.len(), 0);
        assert_eq!(store.events(Some(100)).await.len(), 4);
    }

    #[tokio::test]
    async fn hydrate_truncates_to_capacity() {
        let store = StateStore::new(2);
        let events: Vec<DesktopEvent> = (0..5)
            .map(|i| event(EventKind::Foreground, &format!("win-{i}")))
            .collect();
        store
            .hydrate(events.last().cloned(), events, true, Some(Utc::now()))
            .await;
        let restored = store.events(None).await;
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[1].title, "win-4");
        assert!(store.idle_state().await.0);
    }
}
