//! Socket handshake and I/O tasks.
//!
//! The reader and writer run as two independent tokio tasks so that a slow
//! write never delays inbound dispatch.

// ============================================================================
// Imports
// ============================================================================

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, error, trace, warn};

use crate::connection::ConnectionOptions;
use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// Client WebSocket stream.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the socket.
pub(crate) type WsSink = SplitSink<WsStream, Message>;

/// Read half of the socket.
pub(crate) type WsSource = SplitStream<WsStream>;

/// Instructions for the writer task.
#[derive(Debug)]
pub(crate) enum Outgoing {
    /// Serialized frame to transmit.
    Frame(String),
    /// Start the close handshake and stop writing.
    Close,
}

// ============================================================================
// Handshake
// ============================================================================

/// Builds the socket configuration from connection options.
fn websocket_config(options: &ConnectionOptions) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = options.max_message_size;
    config.max_frame_size = options.max_frame_size;
    config
}

/// Opens the WebSocket.
///
/// # Errors
///
/// Returns [`crate::Error::WebSocket`] if the host is unreachable or the
/// handshake fails.
pub(crate) async fn open(url: &str, options: &ConnectionOptions) -> Result<WsStream> {
    let (stream, response) =
        connect_async_with_config(url, Some(websocket_config(options)), false)
            .await
            .inspect_err(|e| warn!(url, error = %e, "WebSocket handshake failed"))?;

    debug!(url, status = %response.status(), "WebSocket handshake completed");

    Ok(stream)
}

// ============================================================================
// Writer
// ============================================================================

/// Spawns the writer task.
///
/// `on_failure` runs once if a write fails; the task then stops.
pub(crate) fn spawn_writer<F>(
    mut sink: WsSink,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    on_failure: F,
) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(outgoing) = queue.recv().await {
            match outgoing {
                Outgoing::Frame(text) => {
                    let len = text.len();
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(error = %e, "Failed to write frame");
                        on_failure();
                        return;
                    }
                    trace!(len, "Frame sent");
                }

                Outgoing::Close => {
                    debug!("Closing WebSocket");
                    if let Err(e) = sink.close().await {
                        debug!(error = %e, "WebSocket close handshake failed");
                    }
                    return;
                }
            }
        }

        // Every sender is gone.
        let _ = sink.close().await;
        debug!("Writer task terminated");
    })
}

// ============================================================================
// Reader
// ============================================================================

/// Spawns the reader task.
///
/// Fires `ready` once the loop is running, calls `on_frame` for every text
/// frame in arrival order, and calls `on_closed` exactly once when the
/// stream ends for any reason.
pub(crate) fn spawn_reader<F, C>(
    mut source: WsSource,
    ready: oneshot::Sender<()>,
    mut on_frame: F,
    on_closed: C,
) -> JoinHandle<()>
where
    F: FnMut(&str) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        let _ = ready.send(());

        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    trace!(len = text.len(), "Frame received");
                    on_frame(text.as_str());
                }

                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => on_frame(text),
                    Err(e) => warn!(error = %e, "Dropping non UTF-8 binary frame"),
                },

                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by remote");
                    break;
                }

                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    break;
                }

                // Ignore Ping, Pong, raw frames
                Ok(_) => {}
            }
        }

        debug!("Reader task terminated");
        on_closed();
    })
}
