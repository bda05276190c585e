//! Command bridge between the backend and the on-host collector.
//!
//! The collector holds a single duplex WebSocket. Commands go out through an
//! attached outbound channel; each carries a fresh correlation id and parks a
//! one-shot waiter until `handle_incoming` routes the matching result back.
//!
//! Reconnect policy: attaching a new connection supersedes the previous one
//! without failing in-flight waiters. `detach` only acts when it names the
//! live connection, so a stale disconnect sequence from a superseded socket
//! can never clear a live pending set. Detaching the live connection fails
//! every pending waiter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use deskpilot_types::error::BridgeError;
use deskpilot_types::wire::{CommandEnvelope, CommandResult};

/// Identifies one attached collector connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(u64);

#[derive(Clone)]
struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<CommandEnvelope>,
}

/// Snapshot of bridge health for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub connected: bool,
    pub pending_commands: usize,
}

/// Request/response RPC over the collector's duplex connection.
pub struct CommandBridge {
    conn: Mutex<Option<Connection>>,
    pending: DashMap<Uuid, oneshot::Sender<CommandResult>>,
    next_conn_id: AtomicU64,
    default_timeout: Duration,
}

impl CommandBridge {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            conn: Mutex::new(None),
            pending: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
            default_timeout: default_timeout.max(Duration::from_millis(1)),
        }
    }

    /// Bind an outbound channel to the collector. Supersedes any previous
    /// connection; waiters pending on the old connection stay registered and
    /// may still be completed by late results.
    pub fn attach(&self, tx: mpsc::Sender<CommandEnvelope>) -> ConnectionId {
        let id = ConnectionId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        *conn = Some(Connection { id, tx });
        tracing::info!(conn_id = id.0, "collector attached");
        id
    }

    /// Unbind the named connection. No-op unless it is the live one; when it
    /// is, every pending waiter fails with a transport error.
    pub fn detach(&self, id: ConnectionId) {
        {
            let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            match conn.as_ref() {
                Some(current) if current.id == id => *conn = None,
                _ => {
                    tracing::debug!(conn_id = id.0, "ignoring stale detach");
                    return;
                }
            }
        }
        // Dropping the one-shot senders wakes every waiter with a recv error.
        self.pending.clear();
        tracing::info!(conn_id = id.0, "collector detached");
    }

    pub fn connected(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            connected: self.connected(),
            pending_commands: self.pending.len(),
        }
    }

    /// Send one command and await its correlated result.
    ///
    /// Resolves with exactly one of: the collector's reply, a timeout, or a
    /// transport error (send failure or disconnect while in flight).
    pub async fn execute(
        &self,
        action: &str,
        parameters: HashMap<String, serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, BridgeError> {
        let tx = {
            let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.as_ref().ok_or(BridgeError::NotConnected)?.tx.clone()
        };

        let timeout = timeout.unwrap_or(self.default_timeout);
        let command_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(command_id, reply_tx);

        let envelope =
            CommandEnvelope::new(command_id, action, parameters, timeout.as_millis() as u64);
        if let Err(err) = tx.send(envelope).await {
            self.pending.remove(&command_id);
            return Err(BridgeError::Transport(format!(
                "failed to send command: {err}"
            )));
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_closed)) => Err(BridgeError::Transport(
                "collector disconnected while command was in flight".to_string(),
            )),
            Err(_elapsed) => {
                self.pending.remove(&command_id);
                Err(BridgeError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Route an incoming result to its waiter. Unknown correlation ids are
    /// logged and discarded; returns whether a waiter was found.
    pub fn handle_incoming(&self, result: CommandResult) -> bool {
        match self.pending.remove(&result.command_id) {
            Some((_, waiter)) => {
                // Waiter may have timed out between removal and send.
                let _ = waiter.send(result);
                true
            }
            None => {
                tracing::warn!(
                    command_id = %result.command_id,
                    "received result for unknown command"
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
