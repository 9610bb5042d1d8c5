//! Process exit hook
//!
//! Waits for Ctrl+C, SIGTERM or an explicit cancellation, then runs a
//! cleanup action once and logs how it went.

use std::fmt::Display;
use std::future::Future;

/// What ended the wait in [`wait_for_exit_then_cleanup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    /// Ctrl+C or SIGTERM
    Signal,
    /// The caller's cancellation future completed
    Cancelled,
}

/// Resolve when the process receives Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}

/// Block until a termination signal or `cancel`, then run `cleanup`
///
/// Cleanup errors are logged, never propagated.
pub async fn wait_for_exit_then_cleanup<C, Fut, E>(
    cleanup: C,
    cancel: impl Future<Output = ()>,
) -> ExitTrigger
where
    C: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let exit = async {
        tokio::select! {
            _ = shutdown_signal() => ExitTrigger::Signal,
            _ = cancel => ExitTrigger::Cancelled,
        }
    };
    cleanup_after(exit, cleanup).await
}

async fn cleanup_after<C, Fut, E>(exit: impl Future<Output = ExitTrigger>, cleanup: C) -> ExitTrigger
where
    C: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let trigger = exit.await;
    tracing::info!(trigger = ?trigger, "Exit requested, running cleanup");

    match cleanup().await {
        Ok(()) => tracing::info!("Cleanup finished"),
        Err(e) => tracing::error!(error = %e, "Cleanup failed"),
    }
    trigger
}
