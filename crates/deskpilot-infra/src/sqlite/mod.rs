//! SQLite persistence for the run-control plane.

pub mod event;
pub mod pool;
pub mod run;
pub mod task;

use deskpilot_types::error::RepositoryError;

/// Decode a JSON snapshot column into a record type.
fn decode_record<T: serde::de::DeserializeOwned>(
    record: &str,
    kind: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(record)
        .map_err(|e| RepositoryError::Decode(format!("invalid {kind} record JSON: {e}")))
}

/// Serialize a status enum to its snake_case tag for the indexed column.
fn status_tag<T: serde::Serialize>(status: &T) -> Result<String, RepositoryError> {
    match serde_json::to_value(status) {
        Ok(serde_json::Value::String(tag)) => Ok(tag),
        Ok(other) => Err(RepositoryError::Decode(format!(
            "status did not serialize to a string: {other}"
        ))),
        Err(e) => Err(RepositoryError::Decode(e.to_string())),
    }
}
