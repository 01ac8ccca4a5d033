/// Container Runtime - the capability set the launcher depends on
///
/// The launcher never talks to a transport directly. Anything that can
/// create, attach, start, stop and remove a container can drive a session;
/// production uses [`crate::docker::DockerRuntime`], tests use a recording mock.

use async_trait::async_trait;
use bytes::Bytes;
use capsule_common::{ContainerHandle, ExitStatus, PullPolicy, SessionError, SessionRequest, TerminalSize};
use futures_util::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Container output (stdout and stderr, or the merged tty stream) in arrival order
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<Bytes, SessionError>> + Send>>;

/// Container stdin
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Duplex stream wired to a container's standard streams
pub struct AttachedStream {
    pub output: OutputStream,
    pub input: InputSink,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Check the endpoint answers before any resource is created
    async fn ping(&self) -> Result<(), SessionError>;

    /// Make `image` available locally according to `policy`
    async fn ensure_image(&self, image: &str, policy: PullPolicy) -> Result<(), SessionError>;

    async fn create_container(&self, request: &SessionRequest) -> Result<ContainerHandle, SessionError>;

    async fn attach(&self, handle: &ContainerHandle) -> Result<AttachedStream, SessionError>;

    async fn start(&self, handle: &ContainerHandle) -> Result<(), SessionError>;

    async fn resize(&self, handle: &ContainerHandle, size: TerminalSize) -> Result<(), SessionError>;

    /// Block until the container is no longer running and report its status
    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, SessionError>;

    /// Stop the container; stopping one that already exited is not an error
    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), SessionError>;

    /// Forcefully remove the container; removing one that is already gone is not an error
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), SessionError>;
}
