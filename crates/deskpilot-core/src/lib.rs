//! Run-control subsystem for Deskpilot.
//!
//! The layered pair at the heart of the backend: the [`orchestrator`]
//! executes one task step-by-step with approval gates and retries, and the
//! [`autonomy`] runner drives an orchestrator through iterations under an
//! auto-approval policy. Around them sit the [`bridge`] (correlated RPC to
//! the collector), the [`executor`] variants the orchestrator dispatches to,
//! the in-memory [`state_store`], and the bounded fan-out [`hub`].
//!
//! This crate defines the repository "ports" in [`repository`]; the
//! infrastructure layer implements them. It never touches the operating
//! system itself -- host actions only ever leave through an executor.

pub mod approval;
pub mod autonomy;
pub mod bridge;
pub mod executor;
pub mod hub;
pub mod orchestrator;
pub mod planner;
pub mod repository;
pub mod state_store;
