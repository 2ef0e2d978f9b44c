//! Tracing setup and the HTTP middleware stack shared by both services.

use std::any::Any;

use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as CorsAny, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::AppError;

/// Initialise the global `tracing` subscriber for a grist service binary.
///
/// `RUST_LOG` wins when set; otherwise the service's own crate logs at
/// `debug` (consumers, outbox sweeps, and pipelines all trace there) on top
/// of an `info` baseline with HTTP request tracing.
///
/// Call this once, at the very start of `main`, before any tracing macro.
pub fn init_tracing(service: &str) {
    let fallback = format!("info,{}=debug,tower_http=debug", service.replace('-', "_"));
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();
    tracing::info!(service, "tracing initialised");
}

/// Attach the standard middleware stack to a service router.
///
/// - panic capture: an ingestion or answer pipeline that panics must come
///   back as the usual `{ "error": … }` envelope instead of a dropped
///   connection;
/// - HTTP request tracing;
/// - CORS open to any origin but limited to the methods the API actually
///   serves. The SSE endpoints are consumed straight from browsers, which
///   also need cross-origin `DELETE` for stream cancellation.
pub fn apply_http_layers(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(CorsAny)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers(CorsAny),
        )
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    tracing::error!(panic = %detail, "request handler panicked");
    AppError::Internal("internal server error".into()).into_response()
}
