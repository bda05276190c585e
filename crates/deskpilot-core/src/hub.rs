//! Bounded fan-out of JSON snapshots to WebSocket subscribers.
//!
//! Each subscriber is a small bounded channel drained by its socket task.
//! Broadcasts send to every subscriber concurrently with a per-send timeout,
//! so one stalled consumer can never delay the healthy majority by more than
//! that timeout. Subscribers that time out or hang up are swept after the
//! fan-out; new subscribers beyond the connection cap are refused.

use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffered payloads per subscriber before sends start blocking.
const SUBSCRIBER_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("subscriber capacity reached ({0})")]
    CapacityReached(usize),
}

struct HubSubscriber {
    id: u64,
    tx: mpsc::Sender<serde_json::Value>,
}

/// Receiving half handed to the socket task; dropping it detaches the
/// subscriber at the next sweep.
#[derive(Debug)]
pub struct HubSubscription {
    pub id: u64,
    pub rx: mpsc::Receiver<serde_json::Value>,
}

struct HubInner {
    subscribers: Vec<HubSubscriber>,
    next_id: u64,
}

/// Fan-out hub for backend state updates.
pub struct BroadcastHub {
    inner: Mutex<HubInner>,
    max_connections: usize,
    send_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(max_connections: usize, send_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                subscribers: Vec::new(),
                next_id: 1,
            }),
            max_connections: max_connections.max(1),
            send_timeout: send_timeout.max(Duration::from_millis(1)),
        }
    }

    /// Register a subscriber, refusing when the connection cap is reached.
    pub fn subscribe(&self) -> Result<HubSubscription, HubError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.subscribers.len() >= self.max_connections {
            return Err(HubError::CapacityReached(self.max_connections));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        inner.subscribers.push(HubSubscriber { id, tx });
        Ok(HubSubscription { id, rx })
    }

    pub fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscribers.retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .len()
    }

    /// Deliver one payload to every subscriber.
    ///
    /// Sends run concurrently; each is bounded by the per-send timeout.
    /// Subscribers whose send times out or whose channel is gone are
    /// removed after the sweep.
    pub async fn broadcast_json(&self, payload: serde_json::Value) {
        let targets: Vec<(u64, mpsc::Sender<serde_json::Value>)> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .subscribers
                .iter()
                .map(|s| (s.id, s.tx.clone()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let sends = targets.into_iter().map(|(id, tx)| {
            let payload = payload.clone();
            let timeout = self.send_timeout;
            async move {
                match tokio::time::timeout(timeout, tx.send(payload)).await {
                    Ok(Ok(())) => None,
                    // Timed out (consumer stalled) or channel closed.
                    _ => Some(id),
                }
            }
        });

        let stale: Vec<u64> = join_all(sends).await.into_iter().flatten().collect();
        if !stale.is_empty() {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.subscribers.retain(|s| !stale.contains(&s.id));
            tracing::debug!(removed = stale.len(), "dropped stale subscribers");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
