//! Desktop event repository trait definition.

use chrono::{DateTime, Utc};
use deskpilot_types::error::RepositoryError;
use deskpilot_types::observation::DesktopEvent;

/// Snapshot of the durable event state used for startup hydration.
#[derive(Debug, Clone)]
pub struct EventSnapshot {
    pub current: Option<DesktopEvent>,
    pub events: Vec<DesktopEvent>,
    pub idle: bool,
    pub idle_since: Option<DateTime<Utc>>,
}

/// Storage port for desktop event history.
pub trait EventRepository: Send + Sync {
    fn record_event(
        &self,
        event: &DesktopEvent,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    /// The most recent `limit` events plus current/idle state.
    fn load_snapshot(
        &self,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<EventSnapshot, RepositoryError>> + Send;

    fn clear(&self) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
