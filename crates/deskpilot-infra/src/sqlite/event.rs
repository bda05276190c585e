//! SQLite desktop event history.
//!
//! Events land append-only with count-based retention; a small key/value
//! state table tracks the latest foreground event and the idle flag so the
//! state store can be rebuilt after a restart.

use chrono::{DateTime, Utc};
use deskpilot_core::repository::EventRepository;
use deskpilot_core::repository::event::EventSnapshot;
use deskpilot_types::error::RepositoryError;
use deskpilot_types::observation::{DesktopEvent, EventKind};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{decode_record, status_tag};

const STATE_CURRENT_EVENT: &str = "current_event_id";
const STATE_IDLE: &str = "idle";
const STATE_IDLE_SINCE: &str = "idle_since";

/// SQLite-backed implementation of `EventRepository`.
pub struct SqliteEventRepository {
    pool: DatabasePool,
    max_events: u32,
}

impl SqliteEventRepository {
    pub fn new(pool: DatabasePool, max_events: u32) -> Self {
        Self { pool, max_events }
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO control_state (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn state_value(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM control_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        row.map(|row| {
            row.try_get::<String, _>("value")
                .map_err(|e| RepositoryError::Query(e.to_string()))
        })
        .transpose()
    }

    async fn apply_retention(&self) -> Result<(), RepositoryError> {
        if self.max_events == 0 {
            return Ok(());
        }
        sqlx::query(
            "DELETE FROM desktop_events WHERE id IN (
                SELECT id FROM desktop_events ORDER BY id DESC
                LIMIT -1 OFFSET ?
            )",
        )
        .bind(self.max_events as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn event_by_id(&self, id: i64) -> Result<Option<DesktopEvent>, RepositoryError> {
        let row = sqlx::query("SELECT event FROM desktop_events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        row.map(|row| {
            let record: String = row
                .try_get("event")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            decode_record(&record, "event")
        })
        .transpose()
    }

    async fn last_foreground(&self) -> Result<Option<DesktopEvent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT event FROM desktop_events WHERE kind = 'foreground'
             ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        row.map(|row| {
            let record: String = row
                .try_get("event")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            decode_record(&record, "event")
        })
        .transpose()
    }
}

impl EventRepository for SqliteEventRepository {
    async fn record_event(&self, event: &DesktopEvent) -> Result<i64, RepositoryError> {
        let record = serde_json::to_string(event)
            .map_err(|e| RepositoryError::Decode(format!("event encode failed: {e}")))?;
        let result = sqlx::query(
            "INSERT INTO desktop_events (kind, title, process_exe, timestamp, event)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(status_tag(&event.kind)?)
        .bind(&event.title)
        .bind(&event.process_exe)
        .bind(event.timestamp.to_rfc3339())
        .bind(record)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let event_id = result.last_insert_rowid();

        match event.kind {
            EventKind::Foreground => {
                self.set_state(STATE_CURRENT_EVENT, &event_id.to_string())
                    .await?;
            }
            EventKind::Idle => {
                self.set_state(STATE_IDLE, "1").await?;
                self.set_state(STATE_IDLE_SINCE, &event.timestamp.to_rfc3339())
                    .await?;
            }
            EventKind::Active => {
                self.set_state(STATE_IDLE, "0").await?;
                self.set_state(STATE_IDLE_SINCE, "").await?;
            }
            EventKind::Other => {}
        }

        self.apply_retention().await?;
        Ok(event_id)
    }

    async fn load_snapshot(&self, limit: usize) -> Result<EventSnapshot, RepositoryError> {
        let rows = sqlx::query("SELECT event FROM desktop_events ORDER BY id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let mut events: Vec<DesktopEvent> = rows
            .into_iter()
            .map(|row| {
                let record: String = row
                    .try_get("event")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                decode_record(&record, "event")
            })
            .collect::<Result<_, _>>()?;
        events.reverse();

        let current = match self.state_value(STATE_CURRENT_EVENT).await? {
            Some(id) => match id.parse::<i64>() {
                Ok(id) => self.event_by_id(id).await?,
                Err(_) => None,
            },
            None => None,
        };
        let current = match current {
            Some(event) => Some(event),
            None => self.last_foreground().await?,
        };

        let idle = self.state_value(STATE_IDLE).await?.as_deref() == Some("1");
        let idle_since: Option<DateTime<Utc>> = self
            .state_value(STATE_IDLE_SINCE)
            .await?
            .filter(|v| !v.is_empty())
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(EventSnapshot {
            current,
            events,
            idle,
            idle_since,
        })
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM desktop_events")
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        sqlx::query("DELETE FROM control_state")
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
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
            pid: 7,
            timestamp: Utc::now(),
            source: "collector".to_string(),
            idle_ms: None,
            uia_summary: None,
            screenshot_b64: None,
        }
    }

    async fn repo(max_events: u32) -> (SqliteEventRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("e.db").display());
        let pool = DatabasePool::from_url(&url).await.unwrap();
        (SqliteEventRepository::new(pool, max_events), dir)
    }

    #[tokio::test]
    async fn record_and_snapshot_roundtrip() {
        let (repo, _dir) = repo(100).await;
        repo.record_event(&event(EventKind::Foreground, "first"))
            .await
            .unwrap();
        repo.record_event(&event(EventKind::Foreground, "second"))
            .await
            .unwrap();

        let snapshot = repo.load_snapshot(10).await.unwrap();
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.events[0].title, "first");
        assert_eq!(snapshot.current.unwrap().title, "second");
        assert!(!snapshot.idle);
    }

    #[tokio::test]
    async fn idle_state_tracks_idle_and_active() {
        let (repo, _dir) = repo(100).await;
        let mut idle = event(EventKind::Idle, "");
        idle.idle_ms = Some(120_000);
        repo.record_event(&idle).await.unwrap();

        let snapshot = repo.load_snapshot(10).await.unwrap();
        assert!(snapshot.idle);
        assert!(snapshot.idle_since.is_some());

        repo.record_event(&event(EventKind::Active, "")).await.unwrap();
        let snapshot = repo.load_snapshot(10).await.unwrap();
        assert!(!snapshot.idle);
        assert!(snapshot.idle_since.is_none());
    }

    #[tokio::test]
    async fn current_falls_back_to_last_foreground() {
        let (repo, _dir) = repo(100).await;
        repo.record_event(&event(EventKind::Foreground, "window"))
            .await
            .unwrap();
        // Corrupt the pointer; snapshot should fall back by kind.
        repo.set_state(STATE_CURRENT_EVENT, "999999").await.unwrap();

        let snapshot = repo.load_snapshot(10).await.unwrap();
        assert_eq!(snapshot.current.unwrap().title, "window");
    }

    #[tokio::test]
    async fn retention_bounds_event_count() {
        let (repo, _dir) = repo(3).await;
        for i in 0..6 {
            repo.record_event(&event(EventKind::Foreground, &format!("w-{i}")))
                .await
                .unwrap();
        }
        let snapshot = repo.load_snapshot(100).await.unwrap();
        assert_eq!(snapshot.events.len(), 3);
        assert_eq!(snapshot.events[0].title, "w-3");
    }

    #[tokio::test]
    async fn clear_empties_history_and_state() {
        let (repo, _dir) = repo(100).await;
        repo.record_event(&event(EventKind::Foreground, "gone"))
            .await
            .unwrap();
        repo.clear().await.unwrap();
        let snapshot = repo.load_snapshot(10).await.unwrap();
        assert!(snapshot.events.is_empty());
        assert!(snapshot.current.is_none());
    }
}
