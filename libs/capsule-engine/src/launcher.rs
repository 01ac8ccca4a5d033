/// Session Launcher - one interactive container per call
///
/// **Lifecycle:**
/// validate → ping → ensure image → create → attach → start → relay → stop → remove
///
/// **Cleanup guarantee:**
/// Once `create_container` succeeds, stop and remove are each attempted exactly
/// once on every path (exit, stream error, cancellation, timeout). Cleanup
/// failures are logged and never replace the session's own outcome. If the
/// session future itself is dropped, [`ContainerGuard`] removes the container
/// in the background.

use bytes::Bytes;
use capsule_common::{ContainerHandle, ExitStatus, LauncherConfig, SessionError, SessionRequest};
use futures_util::{Sink, Stream};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::console::{Console, ConsoleEvent};
use crate::relay::{self, RelayEnd};
use crate::runtime::ContainerRuntime;

/// How the interactive phase ended, before cleanup
#[derive(Debug)]
enum SessionEnd {
    Exited(ExitStatus),
    Disconnected,
}

pub struct SessionLauncher<R: ContainerRuntime> {
    runtime: Arc<R>,
    config: LauncherConfig,
}

impl<R: ContainerRuntime> SessionLauncher<R> {
    pub fn new(runtime: Arc<R>, config: LauncherConfig) -> Self {
        Self { runtime, config }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Interactive request with the configured image and command filling any gaps
    pub fn request(&self, image: Option<&str>, command: Option<&str>) -> SessionRequest {
        SessionRequest::interactive(
            image.unwrap_or(self.config.default_image.as_str()),
            command.unwrap_or(self.config.default_command.as_str()),
        )
    }

    /// Run `command` interactively in a fresh container from `image`
    pub async fn run_session<I, O>(
        &self,
        image: &str,
        command: &str,
        console: Console<I, O>,
        cancel: CancellationToken,
    ) -> Result<ExitStatus, SessionError>
    where
        I: Stream<Item = io::Result<ConsoleEvent>> + Unpin + Send,
        O: Sink<Bytes, Error = io::Error> + Unpin + Send,
    {
        self.run(SessionRequest::interactive(image, command), console, cancel)
            .await
    }

    #[instrument(skip_all, fields(image = %request.image, command = %request.command))]
    pub async fn run<I, O>(
        &self,
        request: SessionRequest,
        console: Console<I, O>,
        cancel: CancellationToken,
    ) -> Result<ExitStatus, SessionError>
    where
        I: Stream<Item = io::Result<ConsoleEvent>> + Unpin + Send,
        O: Sink<Bytes, Error = io::Error> + Unpin + Send,
    {
        request.validate()?;

        // Nothing exists on the runtime yet, so these can simply be abandoned
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            prepared = self.prepare(&request) => prepared?,
        }

        // Not raced against cancellation: a dropped create could leave an untracked container
        let handle = self.runtime.create_container(&request).await?;
        info!(container = %handle, "Container created");

        let mut guard = ContainerGuard::new(self.runtime.clone(), handle.clone());
        let outcome = self.drive(&handle, console, &cancel).await;
        let outcome = self.cleanup(&handle, outcome).await;
        guard.disarm();

        match &outcome {
            Ok(status) => info!(container = %handle, code = status.code, "Session finished"),
            Err(e) => warn!(container = %handle, kind = e.kind(), error = %e, "Session failed"),
        }
        outcome
    }

    async fn prepare(&self, request: &SessionRequest) -> Result<(), SessionError> {
        self.runtime.ping().await?;
        debug!("Runtime reachable");
        self.runtime
            .ensure_image(&request.image, self.config.pull_policy)
            .await
    }

    /// attach → start → relay, and collect the exit status if the container ended on its own
    async fn drive<I, O>(
        &self,
        handle: &ContainerHandle,
        console: Console<I, O>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, SessionError>
    where
        I: Stream<Item = io::Result<ConsoleEvent>> + Unpin + Send,
        O: Sink<Bytes, Error = io::Error> + Unpin + Send,
    {
        // Attach before start so no early output is lost
        let launch = async {
            let stream = self.runtime.attach(handle).await?;
            self.runtime.start(handle).await?;
            Ok::<_, SessionError>(stream)
        };
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(container_id = %handle.id, "Session cancelled before start completed");
                return Err(SessionError::Cancelled);
            }
            stream = launch => stream?,
        };
        debug!(container_id = %handle.id, "Container started");

        if let Some(size) = console.initial_size.filter(|size| size.is_usable()) {
            if let Err(e) = self.runtime.resize(handle, size).await {
                warn!(container_id = %handle.id, error = %e, "Failed to set initial tty size");
            }
        }

        let pump = relay::relay(&*self.runtime, handle, stream, console);
        let session_timeout = self.config.session_timeout();
        let limited = async {
            match session_timeout {
                Some(limit) => tokio::time::timeout(limit, pump)
                    .await
                    .map_err(|_| SessionError::TimedOut(limit))?,
                None => pump.await,
            }
        };

        let end = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(container_id = %handle.id, "Session cancelled");
                return Err(SessionError::Cancelled);
            }
            end = limited => end?,
        };

        match end {
            RelayEnd::RemoteExited => {
                let status = bounded(self.config.cleanup_timeout(), "wait", self.runtime.wait(handle)).await?;
                Ok(SessionEnd::Exited(status))
            }
            RelayEnd::LocalDisconnected => {
                info!(container_id = %handle.id, "Console disconnected");
                Ok(SessionEnd::Disconnected)
            }
        }
    }

    /// Stop and remove exactly once; a disconnected session also picks up the final status
    async fn cleanup(
        &self,
        handle: &ContainerHandle,
        outcome: Result<SessionEnd, SessionError>,
    ) -> Result<ExitStatus, SessionError> {
        let timeout = self.config.cleanup_timeout();
        let grace = self.config.stop_grace();

        if let Err(e) = bounded(timeout + grace, "stop", self.runtime.stop(handle, grace)).await {
            warn!(container_id = %handle.id, error = %e, "Failed to stop container");
        }

        let outcome = match outcome {
            Ok(SessionEnd::Exited(status)) => Ok(status),
            Ok(SessionEnd::Disconnected) => bounded(timeout, "wait", self.runtime.wait(handle)).await,
            Err(e) => Err(e),
        };

        match bounded(timeout, "remove", self.runtime.remove(handle)).await {
            Ok(()) => debug!(container_id = %handle.id, "Container removed"),
            Err(e) => warn!(container_id = %handle.id, error = %e, "Failed to remove container"),
        }

        outcome
    }
}

/// Cap a runtime call so a wedged daemon cannot hold the session open forever
async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    tokio::time::timeout(limit, call).await.map_err(|_| {
        SessionError::Stream(format!("runtime did not answer {} within {:?}", operation, limit))
    })?
}

/// Container cleanup guard - removes the container if the session future is
/// dropped before its own cleanup ran
struct ContainerGuard<R: ContainerRuntime> {
    runtime: Arc<R>,
    handle: Option<ContainerHandle>,
}

impl<R: ContainerRuntime> ContainerGuard<R> {
    fn new(runtime: Arc<R>, handle: ContainerHandle) -> Self {
        Self {
            runtime,
            handle: Some(handle),
        }
    }

    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl<R: ContainerRuntime> Drop for ContainerGuard<R> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        // Cannot be async in Drop; hand removal to the runtime if one is still around
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let runtime = self.runtime.clone();
                rt.spawn(async move {
                    if let Err(e) = runtime.remove(&handle).await {
                        warn!(container_id = %handle.id, error = %e, "Failed to clean up abandoned container");
                    }
                });
            }
            Err(_) => {
                warn!(container_id = %handle.id, "No async runtime left; container was not removed");
            }
        }
    }
}
