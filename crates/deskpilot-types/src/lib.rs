//! Shared domain types for Deskpilot.
//!
//! This crate contains the core domain types used across the Deskpilot
//! backend: tasks and their plans, autonomy runs, desktop observations,
//! the collector wire protocol, configuration, and error enums.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod observation;
pub mod run;
pub mod task;
pub mod wire;
