use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SessionError;

/// Immutable description of the container a session runs in.
///
/// Built once per invocation, handed to the runtime for creation and
/// dropped once a [`ContainerHandle`] exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub image: String,
    pub command: String,
    pub stdin_open: bool,
    pub tty: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl SessionRequest {
    /// Interactive request: stdin kept open and a pseudo-terminal allocated
    pub fn interactive(image: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: command.into(),
            stdin_open: true,
            tty: true,
            name: None,
            env: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Reject requests the runtime could never satisfy before touching it
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.image.trim().is_empty() {
            return Err(SessionError::InvalidRequest("image must not be empty".to_string()));
        }
        if self.command.trim().is_empty() {
            return Err(SessionError::InvalidRequest("command must not be empty".to_string()));
        }
        self.argv()?;
        if let Some(bad) = self.env.iter().find(|entry| !entry.contains('=')) {
            return Err(SessionError::InvalidRequest(format!(
                "environment entry '{}' is not KEY=VALUE",
                bad
            )));
        }
        Ok(())
    }

    /// Command split into words with POSIX shell quoting rules
    pub fn argv(&self) -> Result<Vec<String>, SessionError> {
        let words = shell_words::split(&self.command).map_err(|e| {
            SessionError::InvalidRequest(format!("command '{}' cannot be parsed: {}", self.command, e))
        })?;
        if words.is_empty() {
            return Err(SessionError::InvalidRequest("command must not be empty".to_string()));
        }
        Ok(words)
    }
}

/// Reference to a container owned by the runtime.
///
/// Valid only between successful creation and successful removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }

    /// Short id, the form `docker ps` prints
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(12);
        &self.id[..end]
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.short_id())
    }
}

/// Exit code reported by the container's main process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: i64,
}

impl ExitStatus {
    pub fn new(code: i64) -> Self {
        Self { code }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Low 8 bits, the way a shell reports a child's status
    pub fn process_code(&self) -> i32 {
        (self.code & 0xff) as i32
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {}", self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl TerminalSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Zero-sized terminals come from detached or headless consoles
    pub fn is_usable(&self) -> bool {
        self.rows > 0 && self.cols > 0
    }
}
