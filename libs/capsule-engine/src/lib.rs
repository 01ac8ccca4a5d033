pub mod console;
pub mod docker;
pub mod launcher;
mod relay;
pub mod runtime;


pub use console::{Console, ConsoleEvent};
pub use docker::DockerRuntime;
pub use launcher::SessionLauncher;
pub use runtime::{AttachedStream, ContainerRuntime};
