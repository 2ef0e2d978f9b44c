//! HTTP server lifecycle shared by the service binaries.

use std::future::IntoFuture;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;

/// Serve `app` on `addr` until `shutdown` fires, then drain in-flight
/// requests for at most `drain_timeout`.
///
/// Long-lived SSE streams would otherwise hold a graceful shutdown open
/// forever; once the drain window elapses they are terminated and the
/// client reconnects or falls back to polling.
pub async fn serve(
    addr: &str,
    app: Router,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let graceful_token = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful_token.cancelled().await })
        .into_future();
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => result,
        _ = shutdown.cancelled() => {
            match tokio::time::timeout(drain_timeout, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = drain_timeout.as_secs(),
                        "shutdown drain timeout elapsed; terminating in-flight streams"
                    );
                    Ok(())
                }
            }
        }
    }
}

/// Cancel `shutdown` on ctrl-c or SIGTERM.
pub async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
