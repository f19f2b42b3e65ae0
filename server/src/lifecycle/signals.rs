use tokio::signal;
use tracing::{info, warn};

/// Resolves when the process is asked to terminate: SIGTERM or SIGINT on Unix, Ctrl-C
/// elsewhere.
///
/// If no handler can be installed this never resolves, and the run can still be ended
/// through its `RunControl`.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal as unix_signal};

        let mut sigterm = match unix_signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "Failed to install SIGTERM handler");
                return core::future::pending().await;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            res = signal::ctrl_c() => match res {
                Ok(()) => info!("Received SIGINT"),
                Err(err) => {
                    warn!(%err, "Failed to listen for SIGINT");
                    drop(sigterm.recv().await);
                }
            },
        }
    }
    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(err) => {
                warn!(%err, "Failed to listen for Ctrl-C");
                core::future::pending::<()>().await;
            }
        }
    }
}
