//! Backend configuration.
//!
//! Loaded from `config.toml` in the data directory; every field has a
//! default so a missing or partial file still yields a working backend.

use serde::{Deserialize, Serialize};

/// Which action executor variant to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    /// Pick by platform and bridge availability.
    Auto,
    /// Always-succeeds executor for tests and offline use.
    Simulated,
    /// Dispatch through the collector command bridge.
    Bridge,
    /// Drive a browser over its remote debugging port.
    Browser,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_executor_mode() -> ExecutorMode {
    ExecutorMode::Auto
}

fn default_bridge_timeout_ms() -> u64 {
    10_000
}

fn default_retry_count() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    50
}

fn default_agent_log_cap() -> usize {
    200
}

fn default_broadcast_max_connections() -> usize {
    64
}

fn default_broadcast_send_timeout_ms() -> u64 {
    1_000
}

fn default_observation_ring_size() -> usize {
    1_000
}

fn default_event_limit() -> usize {
    200
}

fn default_max_stored_events() -> u32 {
    10_000
}

fn default_max_stored_records() -> u32 {
    500
}

fn default_browser_debug_url() -> String {
    "http://127.0.0.1:9222".to_string()
}

/// All options the run-control plane consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunControlConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Override for the SQLite file; defaults to `deskpilot.db` in the data dir.
    #[serde(default)]
    pub database_file: Option<String>,

    #[serde(default = "default_executor_mode")]
    pub action_executor_mode: ExecutorMode,
    /// Per-command bridge timeout.
    #[serde(default = "default_bridge_timeout_ms")]
    pub executor_bridge_timeout_ms: u64,
    /// Dispatch attempts per step; clamped to a minimum of 1.
    #[serde(default = "default_retry_count")]
    pub executor_retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub executor_retry_delay_ms: u64,

    /// Ring size for the per-run agent log.
    #[serde(default = "default_agent_log_cap")]
    pub run_agent_log_cap: usize,

    /// Hard cap on concurrent event-stream subscribers.
    #[serde(default = "default_broadcast_max_connections")]
    pub broadcast_max_connections: usize,
    /// Per-subscriber send timeout during a broadcast sweep.
    #[serde(default = "default_broadcast_send_timeout_ms")]
    pub broadcast_send_timeout_ms: u64,

    /// In-memory observation ring capacity.
    #[serde(default = "default_observation_ring_size")]
    pub observation_ring_size: usize,
    /// Default `limit` for event-listing queries.
    #[serde(default = "default_event_limit")]
    pub event_limit_default: usize,

    /// Durable retention: maximum stored desktop events.
    #[serde(default = "default_max_stored_events")]
    pub db_max_events: u32,
    /// Durable retention: maximum stored task records.
    #[serde(default = "default_max_stored_records")]
    pub db_max_task_records: u32,
    /// Durable retention: maximum stored run records.
    #[serde(default = "default_max_stored_records")]
    pub db_max_autonomy_runs: u32,

    /// DevTools endpoint for the browser executor.
    #[serde(default = "default_browser_debug_url")]
    pub browser_debug_url: String,

    /// CORS allow-list; empty disables CORS headers.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for RunControlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_file: None,
            action_executor_mode: default_executor_mode(),
            executor_bridge_timeout_ms: default_bridge_timeout_ms(),
            executor_retry_count: default_retry_count(),
            executor_retry_delay_ms: default_retry_delay_ms(),
            run_agent_log_cap: default_agent_log_cap(),
            broadcast_max_connections: default_broadcast_max_connections(),
            broadcast_send_timeout_ms: default_broadcast_send_timeout_ms(),
            observation_ring_size: default_observation_ring_size(),
            event_limit_default: default_event_limit(),
            db_max_events: default_max_stored_events(),
            db_max_task_records: default_max_stored_records(),
            db_max_autonomy_runs: default_max_stored_records(),
            browser_debug_url: default_browser_debug_url(),
            allowed_origins: Vec::new(),
        }
    }
}

impl RunControlConfig {
    /// Retry count with the minimum-of-one floor applied.
    pub fn effective_retry_count(&self) -> u32 {
        self.executor_retry_count.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunControlConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.action_executor_mode, ExecutorMode::Auto);
        assert_eq!(config.executor_bridge_timeout_ms, 10_000);
        assert_eq!(config.executor_retry_count, 1);
        assert_eq!(config.run_agent_log_cap, 200);
        assert_eq!(config.broadcast_max_connections, 64);
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RunControlConfig = toml::from_str(
            r#"
port = 9000
action_executor_mode = "bridge"
executor_retry_count = 3
"#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.action_executor_mode, ExecutorMode::Bridge);
        assert_eq!(config.executor_retry_count, 3);
        // untouched fields keep defaults
        assert_eq!(config.executor_retry_delay_ms, 50);
        assert_eq!(config.broadcast_send_timeout_ms, 1_000);
    }

    #[test]
    fn test_retry_count_floor() {
        let mut config = RunControlConfig::default();
        config.executor_retry_count = 0;
        assert_eq!(config.effective_retry_count(), 1);
        config.executor_retry_count = 4;
        assert_eq!(config.effective_retry_count(), 4);
    }

    #[test]
    fn test_executor_mode_serde() {
        for (mode, tag) in [
            (ExecutorMode::Auto, "\"auto\""),
            (ExecutorMode::Simulated, "\"simulated\""),
            (ExecutorMode::Bridge, "\"bridge\""),
            (ExecutorMode::Browser, "\"browser\""),
        ] {
            assert_eq!(serde_json::to_string(&mode).unwrap(), tag);
        }
    }
}
