use thiserror::Error;

/// Errors surfaced by the run-control plane (orchestrator and runner).
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: uuid::Uuid },

    #[error("{0}")]
    Precondition(String),

    #[error("invalid approval token")]
    InvalidToken,

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl ControlError {
    pub fn task_not_found(id: uuid::Uuid) -> Self {
        ControlError::NotFound { kind: "task", id }
    }

    pub fn run_not_found(id: uuid::Uuid) -> Self {
        ControlError::NotFound { kind: "run", id }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        ControlError::Precondition(message.into())
    }
}

/// Errors from the command bridge between backend and collector.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge not connected to collector")]
    NotConnected,

    #[error("command timed out after {0}ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from repository operations (used by trait definitions in deskpilot-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("invalid stored record: {0}")]
    Decode(String),

    #[error("entity not found")]
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_error_display() {
        let id = uuid::Uuid::nil();
        let err = ControlError::task_not_found(id);
        assert_eq!(err.to_string(), format!("task not found: {id}"));

        let err = ControlError::precondition("cannot run task with status completed");
        assert_eq!(err.to_string(), "cannot run task with status completed");
    }

    #[test]
    fn test_bridge_error_display() {
        let err = BridgeError::Timeout(5000);
        assert!(err.to_string().contains("5000"));

        let err = BridgeError::Transport("send failed".to_string());
        assert!(err.to_string().contains("send failed"));
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
