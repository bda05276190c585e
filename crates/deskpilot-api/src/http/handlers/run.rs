//! Autonomy run control-plane handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use uuid::Uuid;

use deskpilot_types::error::ControlError;
use deskpilot_types::run::{RunApproveRequest, RunRecord, StartRunRequest};

use crate::http::error::AppError;
use crate::http::handlers::task::ListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

fn envelope<T: serde::Serialize>(data: T, start: Instant) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(
        data,
        Uuid::now_v7().to_string(),
        start.elapsed().as_millis() as u64,
    ))
}

/// POST /api/v1/runs - Plan the objective and start the worker loop.
pub async fn start_run(
    State(state): State<AppState>,
    Json(body): Json<StartRunRequest>,
) -> Result<Json<ApiResponse<RunRecord>>, AppError> {
    let start = Instant::now();
    if body.objective.trim().is_empty() {
        return Err(AppError::Validation("objective must not be empty".to_string()));
    }
    let run = state.runner.start(body).await?;
    Ok(envelope(run, start))
}

/// GET /api/v1/runs - List recent run snapshots, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<ApiResponse<Vec<RunRecord>>> {
    let start = Instant::now();
    let runs = state.runner.list_runs(query.limit).await;
    envelope(runs, start)
}

/// GET /api/v1/runs/:id - Fetch one run snapshot.
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RunRecord>>, AppError> {
    let start = Instant::now();
    let run = state
        .runner
        .get_run(id)
        .await
        .ok_or(AppError::Control(ControlError::run_not_found(id)))?;
    Ok(envelope(run, start))
}

/// POST /api/v1/runs/:id/approve - Approve the run's pending gate.
pub async fn approve_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RunApproveRequest>,
) -> Result<Json<ApiResponse<RunRecord>>, AppError> {
    let start = Instant::now();
    let run = state.runner.approve(id, &body).await?;
    Ok(envelope(run, start))
}

/// POST /api/v1/runs/:id/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RunRecord>>, AppError> {
    let start = Instant::now();
    let run = state.runner.cancel(id).await?;
    Ok(envelope(run, start))
}
