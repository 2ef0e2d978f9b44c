//! Shared kernel for the grist services.
//!
//! Both the resource service and the search service build on this crate:
//! the HTTP error envelope, tracing/CORS layers, SSE helpers, the
//! per-request channel registries, environment-backed configuration
//! helpers, health checks, and the cross-service event contracts.

pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod layers;
pub mod registry;
pub mod server;
pub mod sse;

pub use config::ConfigError;
pub use error::AppError;
pub use layers::{apply_http_layers, init_tracing};
pub use registry::{CancelRegistry, ChannelRegistry};
