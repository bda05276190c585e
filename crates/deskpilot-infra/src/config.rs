//! Configuration loading for the Deskpilot backend.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`RunControlConfig`]. Falls back to defaults when the file is missing or
//! malformed -- a broken config file must never keep the backend down.

use std::path::{Path, PathBuf};

use deskpilot_types::config::RunControlConfig;

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: returns [`RunControlConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> RunControlConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                "no config.toml found at {}, using defaults",
                config_path.display()
            );
            return RunControlConfig::default();
        }
        Err(err) => {
            tracing::warn!(
                "failed to read {}: {err}, using defaults",
                config_path.display()
            );
            return RunControlConfig::default();
        }
    };

    match toml::from_str::<RunControlConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            RunControlConfig::default()
        }
    }
}

/// Resolve the data directory: `DESKPILOT_DATA_DIR` when set, otherwise
/// `~/.deskpilot`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DESKPILOT_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deskpilot")
}
