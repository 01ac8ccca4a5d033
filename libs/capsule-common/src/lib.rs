pub mod config;
pub mod error;
pub mod types;

pub use config::{LauncherConfig, PullPolicy};
pub use error::SessionError;
pub use types::{ContainerHandle, ExitStatus, SessionRequest, TerminalSize};
