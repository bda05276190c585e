//! UI event-stream WebSocket.
//!
//! Subscribers receive a full snapshot on connect, then every payload the
//! broadcast hub fans out. Connections beyond the hub's capacity are closed
//! immediately with a policy close code.

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;

use crate::state::AppState;

/// Close code sent when the hub refuses a subscriber (policy violation).
const CLOSE_POLICY: u16 = 1008;

pub async fn events_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscriber(socket, state))
}

async fn handle_subscriber(mut socket: WebSocket, state: AppState) {
    let mut subscription = match state.hub.subscribe() {
        Ok(subscription) => subscription,
        Err(err) => {
            tracing::warn!(error = %err, "refusing event-stream subscriber");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY,
                    reason: "subscriber capacity reached".into(),
                })))
                .await;
            return;
        }
    };

    // Initial snapshot so the UI has state before the first broadcast.
    let (current, events) = state.state_store.snapshot().await;
    let (idle, idle_since) = state.state_store.idle_state().await;
    let limit = state.config.event_limit_default;
    let recent: Vec<_> = events
        .iter()
        .rev()
        .take(limit)
        .rev()
        .cloned()
        .collect();
    let snapshot = json!({
        "type": "snapshot",
        "state": {
            "current": current,
            "event_count": events.len(),
            "idle": idle,
            "idle_since": idle_since,
        },
        "events": recent,
    });

    let (mut sink, mut stream) = socket.split();
    if sink
        .send(Message::Text(snapshot.to_string().into()))
        .await
        .is_err()
    {
        state.hub.remove(subscription.id);
        return;
    }

    loop {
        tokio::select! {
            payload = subscription.rx.recv() => match payload {
                Some(value) => {
                    if sink
                        .send(Message::Text(value.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Clients only ever send keepalives on this socket.
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.remove(subscription.id);
}
