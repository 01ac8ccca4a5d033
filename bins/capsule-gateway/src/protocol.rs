// Frames exchanged with WebSocket console clients
use axum::extract::ws::Message;
use bytes::Bytes;
use capsule_common::{ExitStatus, SessionError, TerminalSize};
use capsule_engine::ConsoleEvent;
use serde::{Deserialize, Serialize};
use std::io;

/// Control frames a client may send as text; any other text is keyboard input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Resize { rows: u16, cols: u16 },
}

/// Final frame the gateway sends before closing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Exit { code: i64 },
    Error { kind: String, message: String },
}

impl ServerMessage {
    pub fn from_outcome(outcome: &Result<ExitStatus, SessionError>) -> Self {
        match outcome {
            Ok(status) => ServerMessage::Exit { code: status.code },
            Err(e) => ServerMessage::Error {
                kind: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }

    pub fn into_frame(self) -> Message {
        let text = serde_json::to_string(&self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","kind":"internal","message":"{}"}}"#, e)
        });
        Message::Text(text)
    }
}

/// Translate one client frame; `None` means the frame carries nothing for the container
pub fn console_event(frame: Result<Message, axum::Error>) -> Option<io::Result<ConsoleEvent>> {
    match frame {
        Ok(Message::Binary(data)) => Some(Ok(ConsoleEvent::Input(Bytes::from(data)))),
        Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Resize { rows, cols }) => {
                Some(Ok(ConsoleEvent::Resize(TerminalSize::new(rows, cols))))
            }
            Err(_) => Some(Ok(ConsoleEvent::Input(Bytes::from(text)))),
        },
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Close(_)) => None,
        Err(e) => Some(Err(io::Error::new(io::ErrorKind::ConnectionReset, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_binary_and_plain_text_are_input() {
        let event = console_event(Ok(Message::Binary(b"ls\r".to_vec()))).unwrap().unwrap();
        assert_eq!(event, ConsoleEvent::Input(Bytes::from_static(b"ls\r")));

        let event = console_event(Ok(Message::Text("exit\n".to_string()))).unwrap().unwrap();
        assert_eq!(event, ConsoleEvent::Input(Bytes::from_static(b"exit\n")));
    }

    #[test]
    fn test_resize_frame() {
        let frame = Message::Text(r#"{"type":"resize","rows":40,"cols":120}"#.to_string());
        let event = console_event(Ok(frame)).unwrap().unwrap();
        assert_eq!(event, ConsoleEvent::Resize(TerminalSize::new(40, 120)));
    }

    #[test]
    fn test_json_that_is_not_control_is_input() {
        let frame = Message::Text(r#"{"type":"launch","x":1}"#.to_string());
        let event = console_event(Ok(frame)).unwrap().unwrap();
        assert!(matches!(event, ConsoleEvent::Input(_)));
    }

    #[test]
    fn test_pings_are_skipped() {
        assert!(console_event(Ok(Message::Ping(vec![1]))).is_none());
    }

    #[test]
    fn test_final_frames() {
        let frame = ServerMessage::from_outcome(&Ok(ExitStatus::new(3))).into_frame();
        match frame {
            Message::Text(text) => assert_eq!(text, r#"{"type":"exit","code":3}"#),
            other => panic!("unexpected frame {:?}", other),
        }

        let outcome = Err(SessionError::TimedOut(Duration::from_secs(60)));
        match ServerMessage::from_outcome(&outcome) {
            ServerMessage::Error { kind, .. } => assert_eq!(kind, "timed_out"),
            other => panic!("unexpected message {:?}", other),
        }
    }
}
