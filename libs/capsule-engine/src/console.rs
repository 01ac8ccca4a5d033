// Local end of an interactive session: terminal, WebSocket, or a test harness
use bytes::Bytes;
use capsule_common::TerminalSize;

/// Something the local user did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    Input(Bytes),
    Resize(TerminalSize),
}

/// Console handed to the launcher for one session.
///
/// `events` is read by the inbound flow, `output` is written by the outbound
/// flow; the two never touch each other's half.
pub struct Console<I, O> {
    pub events: I,
    pub output: O,
    pub initial_size: Option<TerminalSize>,
    /// End the session as soon as `events` ends. When false, end of input only
    /// closes the container's stdin and the session runs until the container exits.
    pub hangup_on_eof: bool,
}

impl<I, O> Console<I, O> {
    pub fn new(events: I, output: O) -> Self {
        Self {
            events,
            output,
            initial_size: None,
            hangup_on_eof: true,
        }
    }

    pub fn with_initial_size(mut self, size: TerminalSize) -> Self {
        self.initial_size = Some(size);
        self
    }

    pub fn keep_open_on_eof(mut self) -> Self {
        self.hangup_on_eof = false;
        self
    }
}
