//! Signal handling for graceful shutdown.
//!
//! The first SIGINT/SIGTERM (Ctrl+C on Windows) initiates a graceful
//! shutdown: input stops, the open slide is flushed or dropped, and
//! in-flight batches drain. A second signal exits immediately.

use stream_knn_runtime::ShutdownState;
use tokio::signal;
use tracing::{error, info, warn};

/// Waits for a termination signal.
pub async fn wait_for_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    Ok(())
}

/// Spawns a task that initiates `shutdown` on the first signal and exits the
/// process on the second.
pub fn install(shutdown: ShutdownState) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("Failed to set up shutdown signal handler: {e}");
            return;
        }
        info!("📡 Received shutdown signal - initiating graceful shutdown");
        shutdown.initiate_shutdown();

        // merciless shutdown
        if let Err(e) = wait_for_signal().await {
            error!("Failed to set up merciless shutdown signal handler: {e}");
            return;
        }
        warn!("Shutdown signal received again! Exiting without draining.");
        std::process::exit(1);
    });
}
