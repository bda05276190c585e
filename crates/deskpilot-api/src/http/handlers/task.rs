//! Task control-plane handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use deskpilot_types::task::{PlanRequest, TaskApproveRequest, TaskRecord};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub objective: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

fn envelope<T: serde::Serialize>(data: T, start: Instant) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(
        data,
        Uuid::now_v7().to_string(),
        start.elapsed().as_millis() as u64,
    ))
}

/// POST /api/v1/tasks - Create a task from an objective.
pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Json<ApiResponse<TaskRecord>>, AppError> {
    let start = Instant::now();
    if body.objective.trim().is_empty() {
        return Err(AppError::Validation("objective must not be empty".to_string()));
    }
    let task = state.orchestrator.create_task(body.objective.trim()).await;
    Ok(envelope(task, start))
}

/// GET /api/v1/tasks - List recent task snapshots, newest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<ApiResponse<Vec<TaskRecord>>> {
    let start = Instant::now();
    let tasks = state.orchestrator.list_tasks(query.limit).await;
    envelope(tasks, start)
}

/// GET /api/v1/tasks/:id - Fetch one task snapshot.
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TaskRecord>>, AppError> {
    let start = Instant::now();
    let task = state
        .orchestrator
        .get_task(id)
        .await
        .ok_or(AppError::Control(
            deskpilot_types::error::ControlError::task_not_found(id),
        ))?;
    Ok(envelope(task, start))
}

/// POST /api/v1/tasks/:id/plan - Install or replace the plan.
pub async fn set_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PlanRequest>,
) -> Result<Json<ApiResponse<TaskRecord>>, AppError> {
    let start = Instant::now();
    let task = state.orchestrator.set_plan(id, body).await?;
    Ok(envelope(task, start))
}

/// POST /api/v1/tasks/:id/run - Drive the task until it settles.
pub async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TaskRecord>>, AppError> {
    let start = Instant::now();
    let task = state.orchestrator.run_task(id).await?;
    Ok(envelope(task, start))
}

/// POST /api/v1/tasks/:id/approve - Approve the blocked step.
pub async fn approve_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TaskApproveRequest>,
) -> Result<Json<ApiResponse<TaskRecord>>, AppError> {
    let start = Instant::now();
    let task = state.orchestrator.approve(id, &body).await?;
    Ok(envelope(task, start))
}

/// POST /api/v1/tasks/:id/pause
pub async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TaskRecord>>, AppError> {
    let start = Instant::now();
    let task = state.orchestrator.pause_task(id).await?;
    Ok(envelope(task, start))
}

/// POST /api/v1/tasks/:id/resume
pub async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TaskRecord>>, AppError> {
    let start = Instant::now();
    let task = state.orchestrator.resume_task(id).await?;
    Ok(envelope(task, start))
}

/// POST /api/v1/tasks/:id/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TaskRecord>>, AppError> {
    let start = Instant::now();
    let task = state.orchestrator.cancel_task(id).await?;
    Ok(envelope(task, start))
}
