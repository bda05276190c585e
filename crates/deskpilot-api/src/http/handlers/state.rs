//! Desktop state and event-history handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use deskpilot_types::observation::DesktopEvent;

use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub current: Option<DesktopEvent>,
    pub event_count: usize,
    pub idle: bool,
    pub idle_since: Option<chrono::DateTime<chrono::Utc>>,
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

fn envelope<T: serde::Serialize>(data: T, start: Instant) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(
        data,
        Uuid::now_v7().to_string(),
        start.elapsed().as_millis() as u64,
    ))
}

/// GET /api/v1/state - Current desktop state snapshot.
pub async fn get_state(State(state): State<AppState>) -> Json<ApiResponse<StateResponse>> {
    let start = Instant::now();
    let current = state.state_store.current().await;
    let event_count = state.state_store.event_count().await;
    let (idle, idle_since) = state.state_store.idle_state().await;
    let summary = state.state_store.summary().await;
    envelope(
        StateResponse {
            current,
            event_count,
            idle,
            idle_since,
            summary,
        },
        start,
    )
}

/// GET /api/v1/events - Recent desktop events, oldest first.
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<ApiResponse<Vec<DesktopEvent>>> {
    let start = Instant::now();
    let limit = query.limit.unwrap_or(state.config.event_limit_default);
    let events = state.state_store.events(Some(limit)).await;
    envelope(events, start)
}

/// GET /api/v1/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
