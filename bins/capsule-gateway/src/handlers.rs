// HTTP route handlers for the Capsule gateway

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use capsule_common::{ExitStatus, SessionError, SessionRequest, TerminalSize};
use capsule_engine::{Console, ConsoleEvent, ContainerRuntime};
use futures_util::{future, sink, Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::metrics;
use crate::protocol::{self, ServerMessage};
use crate::AppState;

/// Frames buffered toward a slow client before the container's output backs up
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub image: Option<String>,
    pub command: Option<String>,
    pub rows: Option<u16>,
    pub cols: Option<u16>,
}

impl SessionQuery {
    fn initial_size(&self) -> Option<TerminalSize> {
        match (self.rows, self.cols) {
            (Some(rows), Some(cols)) => Some(TerminalSize::new(rows, cols)).filter(TerminalSize::is_usable),
            _ => None,
        }
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /session - Upgrade to a WebSocket and run one interactive container on it
pub async fn open_session<R: ContainerRuntime>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<SessionQuery>,
) -> Response {
    ws.on_upgrade(move |socket| run_socket_session(socket, query, state))
}

async fn run_socket_session<R: ContainerRuntime>(socket: WebSocket, query: SessionQuery, state: Arc<AppState<R>>) {
    let (mut sender, receiver) = socket.split();

    // Single writer owns the socket's send half; the session and the final status share it
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let events = Box::pin(
        receiver
            .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| future::ready(protocol::console_event(frame))),
    );
    let output = Box::pin(sink::unfold(tx.clone(), |tx, chunk: Bytes| async move {
        tx.send(Message::Binary(chunk.to_vec()))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "websocket client went away"))?;
        Ok::<_, io::Error>(tx)
    }));

    let mut console = Console::new(events, output);
    if let Some(size) = query.initial_size() {
        console = console.with_initial_size(size);
    }

    let request = state
        .launcher
        .request(query.image.as_deref(), query.command.as_deref());
    info!(image = %request.image, command = %request.command, "WebSocket session opened");

    let outcome = run_console_session(&state, request, console).await;

    // Client may already be gone; nothing left to report to in that case
    let _ = tx.send(ServerMessage::from_outcome(&outcome).into_frame()).await;
    let _ = tx.send(Message::Close(None)).await;
    drop(tx);
    let _ = writer.await;
}

/// Run one session under the gateway's shutdown token. The session stays
/// tracked until its container has been stopped and removed.
pub(crate) async fn run_console_session<R, I, O>(
    state: &AppState<R>,
    request: SessionRequest,
    console: Console<I, O>,
) -> Result<ExitStatus, SessionError>
where
    R: ContainerRuntime,
    I: Stream<Item = io::Result<ConsoleEvent>> + Unpin + Send,
    O: Sink<Bytes, Error = io::Error> + Unpin + Send,
{
    metrics::SESSIONS_STARTED.inc();
    metrics::SESSIONS_ACTIVE.inc();
    let outcome = state
        .sessions
        .track_future(state.launcher.run(request, console, state.shutdown.child_token()))
        .await;
    metrics::SESSIONS_ACTIVE.dec();

    match &outcome {
        Ok(status) => {
            metrics::SESSIONS_FINISHED.inc();
            info!(code = status.code, "WebSocket session finished");
        }
        Err(e) => {
            metrics::SESSIONS_FAILED.with_label_values(&[e.kind()]).inc();
            warn!(kind = e.kind(), error = %e, "WebSocket session failed");
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use async_trait::async_trait;
    use capsule_common::{ContainerHandle, LauncherConfig, PullPolicy};
    use capsule_engine::runtime::AttachedStream;
    use capsule_engine::SessionLauncher;
    use futures_util::stream;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    /// Container that runs until stopped; stopping takes a moment, like a grace period
    #[derive(Default)]
    struct SlowStopRuntime {
        calls: Mutex<Vec<&'static str>>,
    }

    impl SlowStopRuntime {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn count(&self, call: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
        }
    }

    #[async_trait]
    impl ContainerRuntime for SlowStopRuntime {
        async fn ping(&self) -> Result<(), SessionError> {
            Ok(())
        }

        async fn ensure_image(&self, _image: &str, _policy: PullPolicy) -> Result<(), SessionError> {
            Ok(())
        }

        async fn create_container(&self, _request: &SessionRequest) -> Result<ContainerHandle, SessionError> {
            self.record("create");
            Ok(ContainerHandle::new("0123456789abcdef", "capsule-gateway-test"))
        }

        async fn attach(&self, _handle: &ContainerHandle) -> Result<AttachedStream, SessionError> {
            Ok(AttachedStream {
                output: Box::pin(stream::pending()),
                input: Box::pin(tokio::io::sink()),
            })
        }

        async fn start(&self, _handle: &ContainerHandle) -> Result<(), SessionError> {
            self.record("start");
            Ok(())
        }

        async fn resize(&self, _handle: &ContainerHandle, _size: TerminalSize) -> Result<(), SessionError> {
            Ok(())
        }

        async fn wait(&self, _handle: &ContainerHandle) -> Result<ExitStatus, SessionError> {
            Ok(ExitStatus::new(137))
        }

        async fn stop(&self, _handle: &ContainerHandle, _grace: Duration) -> Result<(), SessionError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.record("stop");
            Ok(())
        }

        async fn remove(&self, _handle: &ContainerHandle) -> Result<(), SessionError> {
            self.record("remove");
            Ok(())
        }
    }

    type Events = Pin<Box<dyn Stream<Item = io::Result<ConsoleEvent>> + Send>>;
    type Output = Pin<Box<dyn Sink<Bytes, Error = io::Error> + Send>>;

    fn silent_console() -> Console<Events, Output> {
        let events: Events = Box::pin(stream::pending());
        let output: Output = Box::pin(sink::unfold((), |(), _chunk: Bytes| async move {
            Ok::<_, io::Error>(())
        }));
        Console::new(events, output)
    }

    /// Test: shutdown waits until a running session's container is stopped and removed
    #[tokio::test]
    async fn test_shutdown_drains_session_cleanup() {
        let runtime = Arc::new(SlowStopRuntime::default());
        let config = LauncherConfig {
            stop_grace_secs: 0,
            cleanup_timeout_secs: 2,
            ..Default::default()
        };
        let state = Arc::new(AppState {
            launcher: SessionLauncher::new(runtime.clone(), config),
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
        });

        let session_state = state.clone();
        let session = tokio::spawn(async move {
            let request = session_state.launcher.request(Some("alpine:3"), Some("/bin/sh"));
            run_console_session(&session_state, request, silent_console()).await
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while runtime.count("start") == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session should reach start");

        state.shutdown.cancel();
        assert!(shutdown::drain_sessions(&state.sessions, Duration::from_secs(5)).await);

        // Everything has been cleaned up by the time the drain returns
        assert_eq!(runtime.count("stop"), 1);
        assert_eq!(runtime.count("remove"), 1);

        let outcome = session.await.unwrap();
        assert!(matches!(outcome, Err(SessionError::Cancelled)));
    }

    /// Test: a session opened after shutdown began never creates a container
    #[tokio::test]
    async fn test_session_after_shutdown_is_cancelled() {
        let runtime = Arc::new(SlowStopRuntime::default());
        let state = AppState {
            launcher: SessionLauncher::new(runtime.clone(), LauncherConfig::default()),
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
        };
        state.shutdown.cancel();

        let request = state.launcher.request(None, None);
        let outcome = run_console_session(&state, request, silent_console()).await;

        assert!(matches!(outcome, Err(SessionError::Cancelled)));
        assert_eq!(runtime.count("create"), 0);
    }

    #[test]
    fn test_initial_size_requires_both_dimensions() {
        let query = SessionQuery { image: None, command: None, rows: Some(24), cols: Some(80) };
        assert_eq!(query.initial_size(), Some(TerminalSize::new(24, 80)));

        let query = SessionQuery { image: None, command: None, rows: Some(24), cols: None };
        assert!(query.initial_size().is_none());

        let query = SessionQuery { image: None, command: None, rows: Some(0), cols: Some(80) };
        assert!(query.initial_size().is_none());
    }
}
