//! OS signal handling.
//!
//! SIGINT (Ctrl+C) and, on Unix, SIGTERM both mean graceful shutdown.

use tokio::sync::broadcast;

use crate::lifecycle::Shutdown;

/// Subscribe to `shutdown`, then start listening for signals in the background.
///
/// The receiver exists before the signal task does, so a signal that arrives
/// while the server is still starting is not lost.
pub fn spawn_signal_handler(shutdown: &Shutdown) -> broadcast::Receiver<()> {
    let receiver = shutdown.subscribe();
    tokio::spawn(wait_for_signal(shutdown.clone()));
    receiver
}

/// Wait for the first shutdown signal, then trigger `shutdown`.
pub async fn wait_for_signal(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    let notified = shutdown.trigger();
    tracing::info!(notified, "Shutdown signal received");
}
