//! HTTP API: router, request/response mapping, and process wiring.

pub mod app;
pub mod middleware;
pub mod wiring;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolve on Ctrl+C (or SIGTERM on unix), cancelling `token`.
///
/// Also resolves if `token` is cancelled elsewhere.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_listener_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_listener_failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("shutdown_signal_received"),
        _ = terminate => info!("shutdown_signal_received"),
        _ = token.cancelled() => {}
    }
    token.cancel();
}
