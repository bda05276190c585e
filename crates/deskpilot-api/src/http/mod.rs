//! HTTP/WebSocket API layer for Deskpilot.
//!
//! Axum-based REST API at `/api/v1/` with an envelope response format, plus
//! the collector ingest WebSocket and the UI event-stream WebSocket.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
