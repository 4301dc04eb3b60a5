//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGINT and SIGTERM handlers
//! - Resolve once either arrives, so the coordinator can start draining
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A failed registration is logged and the remaining signal still works

/// Resolves on the first SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            None
        }
    };
    let sigterm = async {
        match terminate.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = interrupt() => tracing::info!(signal = "SIGINT", "Termination signal received"),
        _ = sigterm => tracing::info!(signal = "SIGTERM", "Termination signal received"),
    }
}

/// Resolves on Ctrl-C.
#[cfg(not(unix))]
pub async fn termination() {
    interrupt().await;
    tracing::info!(signal = "ctrl-c", "Termination signal received");
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install SIGINT handler");
        std::future::pending::<()>().await;
    }
}
