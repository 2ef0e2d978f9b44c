//! Resource service.
//!
//! Owns the resource lifecycle: uploads come in over HTTP, content is
//! extracted, the resource row and its `resource.created` outbox event are
//! persisted in one transaction, and the caller watches the indexation
//! progress as SSE frames on the same response. The indexation-completion
//! consumer closes the loop by transitioning the row to its terminal status
//! and signalling the per-request status channel.

pub mod config;
pub mod controllers;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod store;

pub use state::AppState;
