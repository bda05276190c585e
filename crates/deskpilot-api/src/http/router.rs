//! Axum router configuration with middleware.
//!
//! REST routes live under `/api/v1/`. The collector WebSocket is `/ingest`
//! and the UI event stream is `/ws/events` (outside the REST namespace).
//! Middleware: CORS (when origins are configured) and request tracing.

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Tasks
        .route(
            "/tasks",
            post(handlers::task::create_task).get(handlers::task::list_tasks),
        )
        .route("/tasks/{id}", get(handlers::task::get_task))
        .route("/tasks/{id}/plan", post(handlers::task::set_plan))
        .route("/tasks/{id}/run", post(handlers::task::run_task))
        .route("/tasks/{id}/approve", post(handlers::task::approve_task))
        .route("/tasks/{id}/pause", post(handlers::task::pause_task))
        .route("/tasks/{id}/resume", post(handlers::task::resume_task))
        .route("/tasks/{id}/cancel", post(handlers::task::cancel_task))
        // Autonomy runs
        .route(
            "/runs",
            post(handlers::run::start_run).get(handlers::run::list_runs),
        )
        .route("/runs/{id}", get(handlers::run::get_run))
        .route("/runs/{id}/approve", post(handlers::run::approve_run))
        .route("/runs/{id}/cancel", post(handlers::run::cancel_run))
        // Executor and bridge health
        .route("/executor/status", get(handlers::executor::executor_status))
        .route(
            "/executor/preflight",
            get(handlers::executor::executor_preflight),
        )
        .route("/bridge/status", get(handlers::executor::bridge_status))
        // Desktop state
        .route("/state", get(handlers::state::get_state))
        .route("/events", get(handlers::state::list_events))
        .route("/health", get(handlers::state::health));

    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .route("/ingest", get(handlers::ingest_ws::ingest_ws))
        .route("/ws/events", get(handlers::events_ws::events_ws));

    if !state.config.allowed_origins.is_empty() {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
