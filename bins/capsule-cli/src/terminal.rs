// Local terminal as a session console: raw mode, stdin/SIGWINCH events, stdout sink
use bytes::Bytes;
use capsule_common::TerminalSize;
use capsule_engine::ConsoleEvent;
use futures_util::{future, stream, Sink, Stream, StreamExt};
use std::io::{self, IsTerminal};
use std::pin::Pin;
use tokio_util::codec::{BytesCodec, FramedWrite};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

pub type TerminalEvents = Pin<Box<dyn Stream<Item = io::Result<ConsoleEvent>> + Send>>;

/// Puts the terminal in raw mode and restores it when dropped
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        debug!("Terminal switched to raw mode");
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

/// Both ends are a terminal, so a pseudo-terminal session makes sense
pub fn is_interactive() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

pub fn current_size() -> Option<TerminalSize> {
    crossterm::terminal::size()
        .ok()
        .map(|(cols, rows)| TerminalSize::new(rows, cols))
        .filter(TerminalSize::is_usable)
}

/// Keystrokes from stdin merged with window-size changes.
///
/// Ends when stdin ends, even though resize notifications never do.
pub fn events() -> TerminalEvents {
    let input = ReaderStream::new(tokio::io::stdin())
        .map(|chunk| Some(chunk.map(ConsoleEvent::Input)))
        .chain(stream::once(future::ready(None)));
    let resizes = resize_events().map(|size| Some(Ok(ConsoleEvent::Resize(size))));

    Box::pin(
        stream::select(input, resizes)
            .take_while(|event| future::ready(event.is_some()))
            .filter_map(future::ready),
    )
}

pub fn output() -> impl Sink<Bytes, Error = io::Error> + Unpin + Send {
    FramedWrite::new(tokio::io::stdout(), BytesCodec::new())
}

#[cfg(unix)]
fn resize_events() -> Pin<Box<dyn Stream<Item = TerminalSize> + Send>> {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::window_change()) {
        Ok(winch) => Box::pin(
            stream::unfold(winch, |mut winch| async move {
                winch.recv().await?;
                Some((current_size(), winch))
            })
            .filter_map(future::ready),
        ),
        Err(e) => {
            warn!(error = %e, "Cannot watch terminal resizes");
            Box::pin(stream::pending())
        }
    }
}

#[cfg(not(unix))]
fn resize_events() -> Pin<Box<dyn Stream<Item = TerminalSize> + Send>> {
    Box::pin(stream::pending())
}
