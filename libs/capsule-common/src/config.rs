// Launcher configuration: defaults <- JSON file <- environment <- CLI flags
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "centos:latest";
pub const DEFAULT_COMMAND: &str = "/bin/sh";
pub const DEFAULT_GATEWAY_ADDR: &str = "127.0.0.1:3000";

/// When to pull the session image before creating the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    #[default]
    Missing,
    Always,
    Never,
}

impl FromStr for PullPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "missing" => Ok(PullPolicy::Missing),
            "always" => Ok(PullPolicy::Always),
            "never" => Ok(PullPolicy::Never),
            other => bail!("Invalid pull policy '{}' (expected missing, always or never)", other),
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PullPolicy::Missing => "missing",
            PullPolicy::Always => "always",
            PullPolicy::Never => "never",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Runtime endpoint; `None` means the local defaults (DOCKER_HOST or the local socket)
    pub docker_host: Option<String>,
    pub default_image: String,
    pub default_command: String,
    pub pull_policy: PullPolicy,
    pub stop_grace_secs: u64,
    pub cleanup_timeout_secs: u64,
    pub session_timeout_secs: Option<u64>,
    pub gateway_addr: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            default_image: DEFAULT_IMAGE.to_string(),
            default_command: DEFAULT_COMMAND.to_string(),
            pull_policy: PullPolicy::Missing,
            stop_grace_secs: 10,
            cleanup_timeout_secs: 15,
            session_timeout_secs: None,
            gateway_addr: DEFAULT_GATEWAY_ADDR.to_string(),
        }
    }
}

impl LauncherConfig {
    /// Load a JSON config file; missing keys keep their defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Defaults, then the file named by `path` or CAPSULE_CONFIG, then the process environment
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var("CAPSULE_CONFIG").ok();
        let path = path.map(Path::to_path_buf).or_else(|| from_env.map(Into::into));

        let mut config = match path {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay environment variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DOCKER_HOST").filter(|v| !v.is_empty()) {
            self.docker_host = Some(host);
        }
        if let Some(image) = lookup("CAPSULE_IMAGE").filter(|v| !v.is_empty()) {
            self.default_image = image;
        }
        if let Some(command) = lookup("CAPSULE_COMMAND").filter(|v| !v.is_empty()) {
            self.default_command = command;
        }
        if let Some(policy) = lookup("CAPSULE_PULL") {
            self.pull_policy = policy.parse()?;
        }
        if let Some(secs) = lookup("CAPSULE_STOP_GRACE") {
            self.stop_grace_secs = parse_secs("CAPSULE_STOP_GRACE", &secs)?;
        }
        if let Some(secs) = lookup("CAPSULE_CLEANUP_TIMEOUT") {
            self.cleanup_timeout_secs = parse_secs("CAPSULE_CLEANUP_TIMEOUT", &secs)?;
        }
        if let Some(secs) = lookup("CAPSULE_SESSION_TIMEOUT") {
            self.session_timeout_secs = match parse_secs("CAPSULE_SESSION_TIMEOUT", &secs)? {
                0 => None,
                n => Some(n),
            };
        }
        if let Some(addr) = lookup("CAPSULE_GATEWAY_ADDR").filter(|v| !v.is_empty()) {
            self.gateway_addr = addr;
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Upper bound on each cleanup call (stop, wait, remove)
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs.max(1))
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{} must be a whole number of seconds, got '{}'", key, value))
}
