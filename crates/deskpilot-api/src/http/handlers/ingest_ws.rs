//! Collector ingest WebSocket.
//!
//! The single duplex connection to the on-host collector. Incoming frames
//! are either correlated command results (routed to the command bridge) or
//! desktop events (persisted, recorded in the state store, and fanned out
//! to UI subscribers). Outgoing command envelopes flow through a channel
//! the bridge holds; a writer task forwards them onto the socket.
//!
//! Attaching registers this socket as the live bridge connection; a newer
//! collector connection supersedes it, after which this handler's detach is
//! a no-op.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use deskpilot_core::repository::EventRepository;
use deskpilot_types::observation::DesktopEvent;
use deskpilot_types::wire::CollectorMessage;

use crate::state::AppState;

/// Buffered outbound commands before bridge sends apply backpressure.
const OUTBOUND_BUFFER: usize = 32;

pub async fn ingest_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_collector(socket, state))
}

async fn handle_collector(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
    let conn_id = state.bridge.attach(tx);

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let frame = match serde_json::to_string(&envelope) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode command envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::info!(error = %err, "collector socket error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(error = %err, "non-JSON frame from collector");
                        continue;
                    }
                };
                match CollectorMessage::parse(value) {
                    Ok(CollectorMessage::CommandResult(result)) => {
                        state.bridge.handle_incoming(result);
                    }
                    Ok(CollectorMessage::Event(event)) => {
                        handle_event(&state, event).await;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "malformed collector message");
                    }
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum automatically.
            _ => {}
        }
    }

    state.bridge.detach(conn_id);
    writer.abort();
    tracing::info!("collector disconnected");
}

/// Persist the event, fold it into the state store, and fan out updates.
async fn handle_event(state: &AppState, event: DesktopEvent) {
    if let Err(err) = state.event_repo.record_event(&event).await {
        tracing::error!(error = %err, "failed to persist desktop event");
    }
    state.state_store.record(event.clone()).await;

    let current = state.state_store.current().await;
    let event_count = state.state_store.event_count().await;
    let (idle, idle_since) = state.state_store.idle_state().await;

    state
        .hub
        .broadcast_json(json!({"type": "event", "event": event}))
        .await;
    state
        .hub
        .broadcast_json(json!({
            "type": "state",
            "state": {
                "current": current,
                "event_count": event_count,
                "idle": idle,
                "idle_since": idle_since,
            },
        }))
        .await;
}
