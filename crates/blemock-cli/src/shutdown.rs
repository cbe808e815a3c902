//! Stop requests from the terminal.

use blemock_core::StopSignal;
use tracing::{info, warn};

/// Spawns a listener that flips the returned signal on SIGINT or SIGTERM
/// (Ctrl+C elsewhere).
///
/// Must be called from inside a tokio runtime.
#[must_use]
pub fn listen_for_shutdown() -> StopSignal {
    let (tx, rx) = blemock_core::stop_channel();

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = tx.send(true);
        // Keep the sender alive so the receiver never sees a closed channel.
        tx.closed().await;
    });

    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Could not install signal handlers, falling back to Ctrl+C");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, stopping..."),
        _ = sigterm.recv() => info!("Received SIGTERM, stopping..."),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, stopping..."),
        Err(e) => {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}
