//! Search service.
//!
//! Owns the vector index and answer generation. The indexation consumer
//! turns `resource.created` events into embedded chunks and reports back
//! with `indexation_complete`; the QA pipeline answers questions over the
//! caller's own chunks, streaming tokens, references, and a final composed
//! result, cancellable by process id at any point.

pub mod config;
pub mod controllers;
pub mod error;
pub mod services;
pub mod state;

pub use state::AppState;
