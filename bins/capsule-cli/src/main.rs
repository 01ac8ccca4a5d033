mod terminal;

use anyhow::Result;
use capsule_common::error::LAUNCHER_FAILURE_CODE;
use capsule_common::{LauncherConfig, PullPolicy};
use capsule_engine::{Console, DockerRuntime, SessionLauncher};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "capsule")]
#[command(about = "Capsule - run an interactive command in a throwaway container", long_about = None)]
struct Cli {
    /// Image to run (defaults to centos:latest)
    image: Option<String>,

    /// Command to run inside the container (defaults to /bin/sh)
    command: Option<String>,

    /// Container name (defaults to capsule-<uuid>)
    #[arg(long)]
    name: Option<String>,

    /// Environment variable for the container, repeatable
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Working directory inside the container
    #[arg(short, long)]
    workdir: Option<String>,

    /// When to pull the image: missing, always or never
    #[arg(long)]
    pull: Option<PullPolicy>,

    /// Runtime endpoint (unix:///var/run/docker.sock, tcp://host:2375)
    #[arg(long)]
    host: Option<String>,

    /// End the session after this many seconds (0 disables the limit)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not allocate a pseudo-terminal
    #[arg(long, default_value = "false")]
    no_tty: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Launcher setup failed");
            eprintln!("capsule: {:#}", e);
            LAUNCHER_FAILURE_CODE
        }
    };

    // Exit directly: the blocking stdin reader would otherwise hold runtime shutdown
    std::process::exit(code);
}

/// Logs go to stderr; stdout belongs to the container
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let json = std::env::var("CAPSULE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<LauncherConfig> {
    let mut config = LauncherConfig::resolve(cli.config.as_deref())?;
    apply_cli(cli, &mut config);
    Ok(config)
}

/// Flags win over the file and the environment
fn apply_cli(cli: &Cli, config: &mut LauncherConfig) {
    if let Some(host) = &cli.host {
        config.docker_host = Some(host.clone());
    }
    if let Some(policy) = cli.pull {
        config.pull_policy = policy;
    }
    if let Some(secs) = cli.timeout {
        config.session_timeout_secs = (secs > 0).then_some(secs);
    }
}

/// Returns the process exit code: the container's own, or a launcher code on failure
async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;
    debug!(?config, "Configuration resolved");

    // One client per process, handed to the launcher
    let runtime = match DockerRuntime::connect(config.docker_host.as_deref()) {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            eprintln!("capsule: {}", e);
            return Ok(e.exit_code());
        }
    };
    let launcher = SessionLauncher::new(runtime, config);

    let interactive = !cli.no_tty && terminal::is_interactive();
    let mut request = launcher
        .request(cli.image.as_deref(), cli.command.as_deref())
        .with_tty(interactive)
        .with_env(cli.env);
    if let Some(name) = cli.name {
        request = request.with_name(name);
    }
    if let Some(dir) = cli.workdir {
        request = request.with_working_dir(dir);
    }

    // Like `docker run -i`: end of input closes the container's stdin, the session runs on
    let mut console = Console::new(terminal::events(), terminal::output()).keep_open_on_eof();
    if interactive {
        if let Some(size) = terminal::current_size() {
            console = console.with_initial_size(size);
        }
    }

    let cancel = CancellationToken::new();
    spawn_signal_watch(cancel.clone());

    info!(image = %request.image, command = %request.command, tty = interactive, "Launching session");
    let raw_mode = if interactive {
        Some(terminal::RawModeGuard::enable()?)
    } else {
        None
    };
    let result = launcher.run(request, console, cancel).await;
    drop(raw_mode);

    match result {
        Ok(status) => {
            info!(code = status.code, "Container exited");
            Ok(status.process_code())
        }
        Err(e) => {
            eprintln!("capsule: {}", e);
            Ok(e.exit_code())
        }
    }
}

/// Cancel the session on SIGINT, SIGTERM or SIGHUP.
///
/// In raw mode Ctrl-C is a keystroke for the container, so SIGINT only
/// arrives from outside.
fn spawn_signal_watch(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Received shutdown signal, stopping session...");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut hangup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hangup)) => (term, hangup),
        _ => {
            warn!("Cannot install SIGTERM/SIGHUP handlers; only Ctrl-C will cancel");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = term.recv() => {},
        _ = hangup.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_leave_image_and_command_to_config() {
        let cli = Cli::try_parse_from(["capsule"]).unwrap();
        assert!(cli.image.is_none());
        assert!(cli.command.is_none());
        assert!(!cli.no_tty);
    }

    #[test]
    fn test_positional_image_and_command() {
        let cli = Cli::try_parse_from(["capsule", "alpine:3", "/bin/ash -l"]).unwrap();
        assert_eq!(cli.image.as_deref(), Some("alpine:3"));
        assert_eq!(cli.command.as_deref(), Some("/bin/ash -l"));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "capsule",
            "--pull",
            "never",
            "-e",
            "TERM=xterm",
            "-e",
            "LANG=C.UTF-8",
            "--timeout",
            "0",
            "--host",
            "tcp://10.0.0.5:2375",
            "ubuntu:24.04",
        ])
        .unwrap();
        assert_eq!(cli.pull, Some(PullPolicy::Never));
        assert_eq!(cli.env, vec!["TERM=xterm", "LANG=C.UTF-8"]);
        assert_eq!(cli.image.as_deref(), Some("ubuntu:24.04"));

        let mut config = LauncherConfig {
            session_timeout_secs: Some(600),
            ..Default::default()
        };
        apply_cli(&cli, &mut config);
        assert_eq!(config.pull_policy, PullPolicy::Never);
        assert_eq!(config.docker_host.as_deref(), Some("tcp://10.0.0.5:2375"));
        assert!(config.session_timeout().is_none());
    }

    #[test]
    fn test_absent_flags_keep_config_values() {
        let cli = Cli::try_parse_from(["capsule"]).unwrap();
        let mut config = LauncherConfig {
            docker_host: Some("unix:///run/user/1000/docker.sock".to_string()),
            pull_policy: PullPolicy::Always,
            session_timeout_secs: Some(30),
            ..Default::default()
        };
        apply_cli(&cli, &mut config);
        assert_eq!(config.docker_host.as_deref(), Some("unix:///run/user/1000/docker.sock"));
        assert_eq!(config.pull_policy, PullPolicy::Always);
        assert_eq!(config.session_timeout(), Some(std::time::Duration::from_secs(30)));
    }

    #[test]
    fn test_rejects_unknown_pull_policy() {
        assert!(Cli::try_parse_from(["capsule", "--pull", "sometimes"]).is_err());
    }
}
