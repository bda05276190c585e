//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use deskpilot_types::error::{BridgeError, ControlError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Run-control plane errors (orchestrator and runner).
    Control(ControlError),
    /// Command bridge errors surfaced directly (status endpoints).
    Bridge(BridgeError),
    /// Request validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<ControlError> for AppError {
    fn from(e: ControlError) -> Self {
        AppError::Control(e)
    }
}

impl From<BridgeError> for AppError {
    fn from(e: BridgeError) -> Self {
        AppError::Bridge(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Control(ControlError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", self_message(&self))
            }
            AppError::Control(ControlError::Precondition(msg)) => {
                (StatusCode::CONFLICT, "PRECONDITION_FAILED", msg.clone())
            }
            AppError::Control(ControlError::InvalidToken) => (
                StatusCode::FORBIDDEN,
                "INVALID_APPROVAL_TOKEN",
                "invalid approval token".to_string(),
            ),
            AppError::Control(ControlError::InvalidPlan(msg)) => {
                (StatusCode::BAD_REQUEST, "INVALID_PLAN", msg.clone())
            }
            AppError::Control(ControlError::Internal(msg)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_INVARIANT",
                msg.clone(),
            ),
            AppError::Bridge(BridgeError::NotConnected) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BRIDGE_NOT_CONNECTED",
                self_message(&self),
            ),
            AppError::Bridge(BridgeError::Timeout(_)) => (
                StatusCode::GATEWAY_TIMEOUT,
                "BRIDGE_TIMEOUT",
                self_message(&self),
            ),
            AppError::Bridge(BridgeError::Transport(msg)) => {
                (StatusCode::BAD_GATEWAY, "BRIDGE_TRANSPORT", msg.clone())
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

fn self_message(err: &AppError) -> String {
    match err {
        AppError::Control(e) => e.to_string(),
        AppError::Bridge(e) => e.to_string(),
        AppError::Validation(msg) | AppError::Internal(msg) => msg.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_errors_map_to_expected_statuses() {
        let cases = [
            (
                AppError::Control(ControlError::task_not_found(uuid::Uuid::nil())),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Control(ControlError::precondition("wrong status")),
                StatusCode::CONFLICT,
            ),
            (
                AppError::Control(ControlError::InvalidToken),
                StatusCode::FORBIDDEN,
            ),
            (
                AppError::Control(ControlError::InvalidPlan("empty".to_string())),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Bridge(BridgeError::Timeout(1000)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                AppError::Bridge(BridgeError::NotConnected),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
