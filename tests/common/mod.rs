//! Mock debuggee shared by the integration tests.
//!
//! Accepts one WebSocket client on a random localhost port and answers
//! every inbound call through a handler.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Reply
// ============================================================================

/// What the mock does with one inbound call.
pub enum Reply {
    /// Send these frames, in order.
    Frames(Vec<Value>),
    /// Send nothing.
    Silent,
    /// Close the socket.
    Close,
}

// ============================================================================
// MockDebuggee
// ============================================================================

/// A running mock debuggee.
pub struct MockDebuggee {
    /// Browser-level WebSocket URL.
    pub url: String,
    /// Server task; finishes when the client goes away.
    pub task: JoinHandle<Vec<Value>>,
}

/// Starts a mock debuggee answering calls with `handler`.
///
/// The server task returns every call it received.
pub async fn spawn_debuggee<F>(handler: F) -> MockDebuggee
where
    F: Fn(&Value) -> Reply + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    let task = tokio::spawn(async move {
        let mut received = Vec::new();
        let (stream, _) = listener.accept().await.expect("accept");
        let mut socket = accept_async(stream).await.expect("handshake");

        while let Some(Ok(message)) = socket.next().await {
            let Message::Text(text) = message else {
                continue;
            };

            let call: Value = serde_json::from_str(text.as_str()).expect("call json");
            let reply = handler(&call);
            received.push(call);

            match reply {
                Reply::Frames(frames) => {
                    for frame in frames {
                        if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                            return received;
                        }
                    }
                }
                Reply::Silent => {}
                Reply::Close => {
                    let _ = socket.close(None).await;
                    break;
                }
            }
        }

        received
    });

    MockDebuggee {
        url: format!("ws://127.0.0.1:{port}/devtools/browser/mock"),
        task,
    }
}

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Echoes the call's `id` (and `sessionId`, if any) around `result`.
pub fn respond(call: &Value, result: Value) -> Value {
    let mut frame = serde_json::json!({ "id": call["id"], "result": result });
    if let Some(session_id) = call.get("sessionId") {
        frame["sessionId"] = session_id.clone();
    }
    frame
}
