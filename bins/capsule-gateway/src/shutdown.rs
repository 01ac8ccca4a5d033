// Process shutdown: signal handling and draining of running sessions

use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Resolves on Ctrl-C or SIGTERM, whichever comes first
#[cfg(unix)]
pub async fn signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Cannot install SIGTERM handler; only Ctrl-C will shut down");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = term.recv() => {},
    }
}

#[cfg(not(unix))]
pub async fn signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Stop admitting sessions and wait for the running ones to finish their cleanup.
/// Returns false if some were still running when `limit` ran out.
pub async fn drain_sessions(sessions: &TaskTracker, limit: Duration) -> bool {
    sessions.close();
    tokio::time::timeout(limit, sessions.wait()).await.is_ok()
}
