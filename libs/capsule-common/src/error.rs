// Session error taxonomy shared by the engine and both binaries
use std::time::Duration;
use thiserror::Error;

/// Exit code for failures of the launcher itself, as opposed to the container
pub const LAUNCHER_FAILURE_CODE: i32 = 125;
/// Daemon refused to execute the command (permission denied)
pub const COMMAND_NOT_EXECUTABLE_CODE: i32 = 126;
/// Daemon could not find the command inside the image
pub const COMMAND_NOT_FOUND_CODE: i32 = 127;
pub const CANCELLED_CODE: i32 = 130;
pub const TIMED_OUT_CODE: i32 = 124;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session request: {0}")]
    InvalidRequest(String),

    #[error("Cannot reach container runtime: {0}")]
    Connection(String),

    #[error("Image not found: {image}")]
    ImageNotFound { image: String },

    #[error("Failed to create container: {0}")]
    ContainerCreate(String),

    #[error("Failed to start container: {0}")]
    ContainerStart(String),

    #[error("Session stream interrupted: {0}")]
    Stream(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Session exceeded its {0:?} time limit")]
    TimedOut(Duration),
}

impl SessionError {
    /// Stable label for logs, metrics and gateway messages
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::InvalidRequest(_) => "invalid_request",
            SessionError::Connection(_) => "connection",
            SessionError::ImageNotFound { .. } => "image_not_found",
            SessionError::ContainerCreate(_) => "container_create",
            SessionError::ContainerStart(_) => "container_start",
            SessionError::Stream(_) => "stream",
            SessionError::Cancelled => "cancelled",
            SessionError::TimedOut(_) => "timed_out",
        }
    }

    /// Process exit code the CLI reports for this failure
    ///
    /// Kept distinct from container exit codes the way `docker run` does:
    /// 125 for launcher/daemon problems, 126/127 when the command itself
    /// cannot be run.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::ContainerStart(message) => {
                let message = message.to_lowercase();
                if message.contains("executable file not found")
                    || message.contains("no such file or directory")
                {
                    COMMAND_NOT_FOUND_CODE
                } else if message.contains("permission denied") {
                    COMMAND_NOT_EXECUTABLE_CODE
                } else {
                    LAUNCHER_FAILURE_CODE
                }
            }
            SessionError::Cancelled => CANCELLED_CODE,
            SessionError::TimedOut(_) => TIMED_OUT_CODE,
            _ => LAUNCHER_FAILURE_CODE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_failures_use_launcher_code() {
        assert_eq!(SessionError::Connection("refused".into()).exit_code(), 125);
        assert_eq!(
            SessionError::ImageNotFound { image: "does-not-exist:latest".into() }.exit_code(),
            125
        );
        assert_eq!(SessionError::Stream("reset".into()).exit_code(), 125);
    }

    #[test]
    fn test_start_failures_follow_docker_run_codes() {
        let missing = SessionError::ContainerStart(
            "exec: \"/bin/bash\": stat /bin/bash: no such file or directory".into(),
        );
        assert_eq!(missing.exit_code(), 127);

        let denied = SessionError::ContainerStart("exec /app: permission denied".into());
        assert_eq!(denied.exit_code(), 126);

        let other = SessionError::ContainerStart("cannot allocate memory".into());
        assert_eq!(other.exit_code(), 125);
    }

    #[test]
    fn test_interrupt_codes() {
        assert_eq!(SessionError::Cancelled.exit_code(), 130);
        assert_eq!(SessionError::TimedOut(Duration::from_secs(5)).exit_code(), 124);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(SessionError::ImageNotFound { image: "x".into() }.kind(), "image_not_found");
        assert_eq!(SessionError::Cancelled.kind(), "cancelled");
    }
}
