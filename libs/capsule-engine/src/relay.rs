// Bidirectional relay between a local console and an attached container
use bytes::Bytes;
use capsule_common::{ContainerHandle, SessionError};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::io;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::console::{Console, ConsoleEvent};
use crate::runtime::{AttachedStream, ContainerRuntime};

/// Why the relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelayEnd {
    /// Container output closed: the main process exited
    RemoteExited,
    /// Local console went away (input ended with hangup, or output could not be written)
    LocalDisconnected,
}

/// Pump bytes in both directions until either side ends.
///
/// Each flow owns one half of the duplex stream. Whichever finishes first
/// decides the outcome; the other is dropped, which releases its half.
pub(crate) async fn relay<R, I, O>(
    runtime: &R,
    handle: &ContainerHandle,
    stream: AttachedStream,
    console: Console<I, O>,
) -> Result<RelayEnd, SessionError>
where
    R: ContainerRuntime,
    I: Stream<Item = io::Result<ConsoleEvent>> + Unpin + Send,
    O: Sink<Bytes, Error = io::Error> + Unpin + Send,
{
    let AttachedStream {
        output: mut remote_output,
        input: mut remote_input,
    } = stream;
    let Console {
        mut events,
        mut output,
        hangup_on_eof,
        ..
    } = console;

    let inbound = async {
        while let Some(event) = events.next().await {
            match event {
                Ok(ConsoleEvent::Input(bytes)) => {
                    remote_input
                        .write_all(&bytes)
                        .await
                        .map_err(|e| SessionError::Stream(format!("write to container stdin failed: {}", e)))?;
                    remote_input
                        .flush()
                        .await
                        .map_err(|e| SessionError::Stream(format!("flush to container stdin failed: {}", e)))?;
                }
                Ok(ConsoleEvent::Resize(size)) => {
                    if !size.is_usable() {
                        continue;
                    }
                    if let Err(e) = runtime.resize(handle, size).await {
                        warn!(container_id = %handle.id, error = %e, "Failed to resize container tty");
                    }
                }
                Err(e) => {
                    warn!(container_id = %handle.id, error = %e, "Console input failed");
                    return Ok(RelayEnd::LocalDisconnected);
                }
            }
        }

        debug!(container_id = %handle.id, hangup_on_eof, "Console input ended");
        if hangup_on_eof {
            return Ok(RelayEnd::LocalDisconnected);
        }

        // Half-close stdin and let the container finish on its own
        if let Err(e) = remote_input.shutdown().await {
            debug!(container_id = %handle.id, error = %e, "Failed to close container stdin");
        }
        std::future::pending::<Result<RelayEnd, SessionError>>().await
    };

    let outbound = async {
        while let Some(chunk) = remote_output.next().await {
            let chunk = chunk?;
            if let Err(e) = output.send(chunk).await {
                debug!(container_id = %handle.id, error = %e, "Console output closed");
                return Ok(RelayEnd::LocalDisconnected);
            }
        }
        Ok::<_, SessionError>(RelayEnd::RemoteExited)
    };

    tokio::select! {
        end = inbound => end,
        end = outbound => end,
    }
}
