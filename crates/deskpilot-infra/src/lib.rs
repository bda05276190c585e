//! Infrastructure layer for Deskpilot.
//!
//! Contains implementations of the repository traits defined in
//! `deskpilot-core` (SQLite storage for tasks, runs, and desktop events)
//! plus configuration-file loading.

pub mod config;
pub mod sqlite;
