//! Shutdown signals.
//!
//! SIGINT and SIGTERM on Unix, Ctrl+C everywhere else. The monitor loop
//! passes [`wait_for_shutdown`] to the engine as its stop condition, so a
//! cycle already in flight finishes before dotmirror exits.

use tracing::info;

/// Resolves once a termination signal arrives.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    #[cfg(unix)]
    let terminate = sigterm.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    let name = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.expect("failed to install Ctrl+C handler");
            "SIGINT"
        }
        _ = terminate => "SIGTERM",
    };
    info!("{name} received, stopping dotmirror after the current cycle");
}
