//! Observability setup for Deskpilot.
//!
//! Structured logging via `tracing`, with optional OpenTelemetry export for
//! local development.

pub mod tracing_setup;
