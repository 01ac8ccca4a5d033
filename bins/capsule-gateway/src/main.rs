mod handlers;
mod metrics;
mod protocol;
mod routes;
mod shutdown;

use anyhow::{Context, Result};
use axum::Router;
use capsule_common::LauncherConfig;
use capsule_engine::{ContainerRuntime, DockerRuntime, SessionLauncher};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub struct AppState<R: ContainerRuntime> {
    pub launcher: SessionLauncher<R>,
    /// Parent of every session's cancel token
    pub shutdown: CancellationToken,
    /// Sessions still running, including their stop and remove
    pub sessions: TaskTracker,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    info!("Capsule gateway booting...");

    let config = LauncherConfig::resolve(None).context("Failed to load configuration")?;
    metrics::register().context("Failed to register metrics")?;

    let runtime = Arc::new(
        DockerRuntime::connect(config.docker_host.as_deref())
            .context("Failed to build container runtime client")?,
    );
    match runtime.ping().await {
        Ok(()) => info!("Container runtime reachable"),
        // Sessions will report the problem to their clients; keep serving
        Err(e) => warn!(error = %e, "Container runtime not reachable yet"),
    }

    let addr = config.gateway_addr.clone();
    // Stop with grace, then the final wait and remove
    let drain_limit = config.stop_grace() + config.cleanup_timeout() * 2;
    let cancel_all = CancellationToken::new();
    let sessions = TaskTracker::new();
    let state = Arc::new(AppState {
        launcher: SessionLauncher::new(runtime, config),
        shutdown: cancel_all.clone(),
        sessions: sessions.clone(),
    });

    let app = Router::new()
        .merge(routes::routes::<DockerRuntime>())
        .with_state(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("WebSocket gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown::signal().await;
            warn!("Received shutdown signal, cancelling sessions...");
            cancel_all.cancel();
        })
        .await
        .context("Server error")?;

    info!(active = sessions.len(), "Waiting for sessions to clean up");
    if shutdown::drain_sessions(&sessions, drain_limit).await {
        info!("Gateway shutdown complete");
    } else {
        warn!(remaining = sessions.len(), "Shutdown deadline passed with sessions still cleaning up");
    }
    Ok(())
}
