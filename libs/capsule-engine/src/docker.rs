/// Docker runtime - the production [`ContainerRuntime`] backed by Bollard
///
/// **Error mapping:**
/// - Transport failures (socket missing, connection refused, timeouts) → `Connection`
/// - 404 on create or pull → `ImageNotFound`
/// - Daemon rejection on start → `ContainerStart` with the daemon's message
/// - Attach/wait problems → `Stream`
///
/// Stop and remove treat "already stopped" / "already gone" as success so
/// cleanup stays idempotent.

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, ResizeContainerTtyOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use capsule_common::{ContainerHandle, ExitStatus, PullPolicy, SessionError, SessionRequest, TerminalSize};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::runtime::{AttachedStream, ContainerRuntime};

/// Label put on every session container so strays can be found with `docker ps --filter`
pub const SESSION_LABEL: &str = "io.capsule.session";

/// Seconds Bollard waits on a single request
const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Build a client for `host`, or for the local defaults when `host` is `None`.
    ///
    /// No request is made here; an unreachable daemon surfaces on the first call.
    pub fn connect(host: Option<&str>) -> Result<Self, SessionError> {
        let docker = match host {
            None => Docker::connect_with_local_defaults(),
            #[cfg(unix)]
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, REQUEST_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(host, REQUEST_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            Some(host) => {
                return Err(SessionError::Connection(format!(
                    "unsupported runtime endpoint '{}'",
                    host
                )))
            }
        }
        .map_err(|e| SessionError::Connection(e.to_string()))?;

        Ok(Self { docker })
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull(&self, image: &str) -> Result<(), SessionError> {
        let (repository, tag) = split_image_reference(image);
        let options = Some(CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(|e| pull_error(image, e))?;
            if let Some(status) = progress.status {
                debug!(image = %image, status = %status, "Pull progress");
            }
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), SessionError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Connection(e.to_string()))
    }

    async fn ensure_image(&self, image: &str, policy: PullPolicy) -> Result<(), SessionError> {
        let present = match self.docker.inspect_image(image).await {
            Ok(_) => true,
            Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => false,
            Err(e) => return Err(inspect_error(image, e)),
        };

        match (policy, present) {
            (PullPolicy::Never, false) => Err(SessionError::ImageNotFound {
                image: image.to_string(),
            }),
            (PullPolicy::Missing, true) | (PullPolicy::Never, true) => {
                debug!(image = %image, "Image cache hit");
                Ok(())
            }
            _ => {
                if present {
                    debug!(image = %image, "Refreshing image");
                } else {
                    warn!(image = %image, "Image cache miss (pulling now)");
                }
                self.pull(image).await
            }
        }
    }

    async fn create_container(&self, request: &SessionRequest) -> Result<ContainerHandle, SessionError> {
        let cmd = request.argv()?;
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("capsule-{}", uuid::Uuid::new_v4()));

        let mut labels = HashMap::new();
        labels.insert(SESSION_LABEL.to_string(), "true".to_string());

        let config = Config {
            image: Some(request.image.clone()),
            cmd: Some(cmd),
            env: (!request.env.is_empty()).then(|| request.env.clone()),
            working_dir: request.working_dir.clone(),
            tty: Some(request.tty),
            open_stdin: Some(request.stdin_open),
            stdin_once: Some(false),
            attach_stdin: Some(request.stdin_open),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: Some(labels),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                classify(e, |status, message| {
                    if status == 404 {
                        SessionError::ImageNotFound {
                            image: request.image.clone(),
                        }
                    } else {
                        SessionError::ContainerCreate(message)
                    }
                })
            })?;

        for warning in &response.warnings {
            warn!(container = %name, warning = %warning, "Runtime warning on create");
        }

        Ok(ContainerHandle::new(response.id, name))
    }

    async fn attach(&self, handle: &ContainerHandle) -> Result<AttachedStream, SessionError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            ..Default::default()
        };

        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(&handle.id, Some(options))
            .await
            .map_err(|e| SessionError::Stream(e.to_string()))?;

        let output = output.map(|frame| match frame {
            Ok(LogOutput::StdOut { message })
            | Ok(LogOutput::StdErr { message })
            | Ok(LogOutput::StdIn { message })
            | Ok(LogOutput::Console { message }) => Ok(message),
            Err(e) => Err(SessionError::Stream(e.to_string())),
        });

        Ok(AttachedStream {
            output: Box::pin(output),
            input,
        })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), SessionError> {
        self.docker
            .start_container(&handle.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, |_, message| SessionError::ContainerStart(message)))
    }

    async fn resize(&self, handle: &ContainerHandle, size: TerminalSize) -> Result<(), SessionError> {
        let options = ResizeContainerTtyOptions {
            height: size.rows,
            width: size.cols,
        };
        self.docker
            .resize_container_tty(&handle.id, options)
            .await
            .map_err(|e| classify(e, |_, message| SessionError::Stream(message)))
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, SessionError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(&handle.id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(ExitStatus::new(response.status_code)),
            // Bollard reports a non-zero exit as an error; for us it is just the status
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(ExitStatus::new(code)),
            Some(Err(e)) => Err(classify(e, |_, message| SessionError::Stream(message))),
            None => Err(SessionError::Stream(
                "runtime closed the wait stream without an exit status".to_string(),
            )),
        }
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), SessionError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(&handle.id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError { status_code: 304, .. })
            | Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(classify(e, |_, message| SessionError::Stream(message))),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), SessionError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(&handle.id, Some(options)).await {
            Ok(()) => Ok(()),
            // 409: removal already in progress
            Err(DockerError::DockerResponseServerError { status_code: 404, .. })
            | Err(DockerError::DockerResponseServerError { status_code: 409, .. }) => Ok(()),
            Err(e) => Err(classify(e, |_, message| SessionError::Stream(message))),
        }
    }
}

/// Map a Bollard error: daemon responses go through `on_response`, anything
/// else never reached the daemon and is a connection problem
fn classify<F>(err: DockerError, on_response: F) -> SessionError
where
    F: FnOnce(u16, String) -> SessionError,
{
    match err {
        DockerError::DockerResponseServerError { status_code, message } => on_response(status_code, message),
        other => SessionError::Connection(other.to_string()),
    }
}

/// The daemon answered the inspect, so only a transport failure is a connection problem
fn inspect_error(image: &str, err: DockerError) -> SessionError {
    classify(err, |status_code, message| match status_code {
        400 => SessionError::InvalidRequest(format!("invalid image reference '{}': {}", image, message)),
        _ => SessionError::ContainerCreate(format!("inspect of '{}' failed: {}", image, message)),
    })
}

fn pull_error(image: &str, err: DockerError) -> SessionError {
    let not_found = |message: &str| {
        let message = message.to_lowercase();
        message.contains("not found")
            || message.contains("pull access denied")
            || message.contains("manifest unknown")
            || message.contains("repository does not exist")
    };

    match err {
        DockerError::DockerResponseServerError { status_code: 404, .. } => SessionError::ImageNotFound {
            image: image.to_string(),
        },
        DockerError::DockerResponseServerError { message, .. } if not_found(&message) => {
            SessionError::ImageNotFound {
                image: image.to_string(),
            }
        }
        DockerError::DockerResponseServerError { message, .. } => {
            SessionError::ContainerCreate(format!("pull of '{}' failed: {}", image, message))
        }
        DockerError::DockerStreamError { error } if not_found(&error) => SessionError::ImageNotFound {
            image: image.to_string(),
        },
        DockerError::DockerStreamError { error } => {
            SessionError::ContainerCreate(format!("pull of '{}' failed: {}", image, error))
        }
        other => SessionError::Connection(other.to_string()),
    }
}

/// Split `repo[:tag]` so a bare repository pulls `latest` instead of every tag.
/// Digest references are passed through whole.
fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(colon) => {
            let colon = name_start + colon;
            (&image[..colon], &image[colon + 1..])
        }
        None => (image, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16, message: &str) -> DockerError {
        DockerError::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("centos:latest"), ("centos", "latest"));
        assert_eq!(split_image_reference("alpine"), ("alpine", "latest"));
        assert_eq!(
            split_image_reference("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", "latest")
        );
        assert_eq!(
            split_image_reference("registry.local:5000/team/app:1.2"),
            ("registry.local:5000/team/app", "1.2")
        );
        assert_eq!(
            split_image_reference("alpine@sha256:abcd"),
            ("alpine@sha256:abcd", "")
        );
    }

    #[test]
    fn test_classify_transport_errors_as_connection() {
        let err = classify(DockerError::RequestTimeoutError, |_, m| SessionError::ContainerStart(m));
        assert!(matches!(err, SessionError::Connection(_)));
    }

    #[test]
    fn test_classify_passes_daemon_responses_through() {
        let err = classify(server_error(500, "cgroup limit"), |_, m| SessionError::ContainerStart(m));
        match err {
            SessionError::ContainerStart(message) => assert_eq!(message, "cgroup limit"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pull_errors() {
        let err = pull_error("does-not-exist:latest", server_error(404, "manifest unknown"));
        assert!(matches!(err, SessionError::ImageNotFound { .. }));

        let err = pull_error(
            "private/thing",
            server_error(500, "pull access denied for private/thing, repository does not exist"),
        );
        assert!(matches!(err, SessionError::ImageNotFound { .. }));

        let err = pull_error("alpine", server_error(500, "no space left on device"));
        assert!(matches!(err, SessionError::ContainerCreate(_)));

        let err = pull_error("alpine", DockerError::RequestTimeoutError);
        assert!(matches!(err, SessionError::Connection(_)));
    }

    #[test]
    fn test_inspect_errors() {
        let err = inspect_error("capsule UPPER:tag", server_error(400, "invalid reference format"));
        match err {
            SessionError::InvalidRequest(message) => assert!(message.contains("invalid reference format")),
            other => panic!("unexpected {:?}", other),
        }

        let err = inspect_error("alpine", server_error(500, "layer store corrupted"));
        assert!(matches!(err, SessionError::ContainerCreate(_)));

        let err = inspect_error("alpine", DockerError::RequestTimeoutError);
        assert!(matches!(err, SessionError::Connection(_)));
    }

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        let err = DockerRuntime::connect(Some("ftp://example")).err().unwrap();
        assert!(matches!(err, SessionError::Connection(_)));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_ping_local_daemon() {
        let runtime = DockerRuntime::connect(None).expect("Failed to build Docker client");
        runtime.ping().await.expect("Docker daemon should answer");
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_missing_image_is_reported() {
        let runtime = DockerRuntime::connect(None).expect("Failed to build Docker client");
        let err = runtime
            .ensure_image("capsule-does-not-exist/nothing:latest", PullPolicy::Missing)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ImageNotFound { .. }));
    }
}
