//! Signal-driven publisher close

use crate::publisher::Publisher;
use crate::PLUGIN_NAME;
use std::future::Future;
use std::sync::Arc;

/// Resolves when the process receives SIGINT or SIGTERM
///
/// On non-unix targets only ctrl-c is observed. If a handler cannot be
/// installed the failure is logged and that signal is never reported.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
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
}

/// Close `publisher` once `signal` resolves
///
/// The close takes the publisher's guard, so a publish in progress finishes
/// first and every later publish fails with a closed error.
pub async fn close_on<F>(publisher: Arc<Publisher>, signal: F)
where
    F: Future<Output = ()>,
{
    signal.await;
    tracing::info!(
        plugin = PLUGIN_NAME,
        "[PLUGIN: {}] shutdown signal received, closing publisher",
        PLUGIN_NAME
    );
    match publisher.close().await {
        Ok(()) => tracing::info!(plugin = PLUGIN_NAME, "publisher closed"),
        Err(err) => tracing::error!(
            plugin = PLUGIN_NAME,
            error = %err,
            "[PLUGIN: {}] failed to close publisher: {}",
            PLUGIN_NAME,
            err
        ),
    }
}
