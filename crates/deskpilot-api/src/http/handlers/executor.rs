//! Executor and bridge status handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use uuid::Uuid;

use deskpilot_core::bridge::BridgeStatus;
use deskpilot_core::executor::{ExecutorStatus, PreflightReport};

use crate::http::response::ApiResponse;
use crate::state::AppState;

fn envelope<T: serde::Serialize>(data: T, start: Instant) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(
        data,
        Uuid::now_v7().to_string(),
        start.elapsed().as_millis() as u64,
    ))
}

/// GET /api/v1/executor/status - Cheap health snapshot.
pub async fn executor_status(State(state): State<AppState>) -> Json<ApiResponse<ExecutorStatus>> {
    let start = Instant::now();
    envelope(state.orchestrator.executor_status(), start)
}

/// GET /api/v1/executor/preflight - Probe the executor before a run.
pub async fn executor_preflight(
    State(state): State<AppState>,
) -> Json<ApiResponse<PreflightReport>> {
    let start = Instant::now();
    let report = state.orchestrator.executor_preflight().await;
    envelope(report, start)
}

/// GET /api/v1/bridge/status - Collector connection health.
pub async fn bridge_status(State(state): State<AppState>) -> Json<ApiResponse<BridgeStatus>> {
    let start = Instant::now();
    envelope(state.bridge.status(), start)
}
