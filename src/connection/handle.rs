//! Connection handle and shared connection state.
//!
//! A [`Connection`] owns the transport, allocates call IDs, correlates
//! responses and owns the session arena. Cloning a `Connection` clones the
//! handle; all clones share one socket.
//!
//! # Event Loop
//!
//! Two tokio tasks run per connection:
//!
//! - the reader feeds every inbound frame, in arrival order, through the
//!   router while holding the state lock for the duration of one frame
//! - the writer drains the outgoing queue, so `send` never waits on I/O
//!
//! # Disposal
//!
//! [`Connection::dispose`] and transport closure share one idempotent path:
//! the first caller marks the state closed, rejects every pending call,
//! tears down every session, runs the close callback and emits
//! `Disconnected`. Later calls do nothing.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::identifiers::{CallId, SessionId, TargetId};
use crate::protocol::{
    AttachToTargetResult, BrowserCommand, BrowserVersion, Command, CreateTargetResult,
    GetTargetsResult, Inbound, OutgoingCall, TargetCommand, TargetInfo,
};
use crate::session::Session;
use crate::transport::{self, Outgoing};

use super::builder::ConnectionBuilder;
use super::options::ConnectionOptions;
use super::pending::{Attachment, PendingResponse};
use super::state::{Deliveries, State};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked once when the connection is disposed.
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// Inner
// ============================================================================

/// State shared by every handle of one connection.
pub(crate) struct Inner {
    /// WebSocket URL.
    url: String,
    /// Behaviour options.
    pub(crate) options: ConnectionOptions,
    /// Connection-wide call counter.
    last_id: AtomicU64,
    /// Pending calls and session arena.
    pub(crate) state: Mutex<State>,
    /// Root event subscribers.
    pub(crate) events: Arc<EventBus>,
    /// Queue drained by the writer task.
    outgoing: mpsc::UnboundedSender<Outgoing>,
    /// Run once on disposal.
    on_close: Mutex<Option<CloseCallback>>,
    /// Writer and reader tasks.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn new(
        url: String,
        options: ConnectionOptions,
        outgoing: mpsc::UnboundedSender<Outgoing>,
        on_close: Option<CloseCallback>,
    ) -> Self {
        Self {
            url,
            options,
            last_id: AtomicU64::new(0),
            state: Mutex::new(State::default()),
            events: Arc::new(EventBus::new()),
            outgoing,
            on_close: Mutex::new(on_close),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Allocates the next connection-wide call ID.
    pub(crate) fn next_id(&self) -> CallId {
        CallId::new(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Issues a call at the connection root.
    pub(crate) fn call_root(&self, method: String, params: Option<Value>) -> PendingResponse {
        self.call_root_with(method, params, None)
    }

    /// Issues a call at the connection root, registering the attached
    /// session when `attachment` is set and the call succeeds.
    pub(crate) fn call_root_with(
        &self,
        method: String,
        params: Option<Value>,
        attachment: Option<Attachment>,
    ) -> PendingResponse {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();

        let frame = {
            let mut state = self.state.lock();
            if state.closed {
                return PendingResponse::rejected(id, Error::TargetClosed);
            }

            let frame = match OutgoingCall::new(id, method.as_str(), params).to_frame() {
                Ok(frame) => frame,
                Err(e) => return PendingResponse::rejected(id, e),
            };
            state.pending.insert(id, method, tx, attachment);
            frame
        };

        self.transmit(frame);
        PendingResponse::new(id, rx)
    }

    /// Queues a frame for the writer.
    ///
    /// Must not be called with the state lock held.
    pub(crate) fn transmit(&self, frame: String) {
        if self.outgoing.send(Outgoing::Frame(frame)).is_err() {
            debug!("Writer gone, disposing connection");
            self.shutdown_now();
        }
    }

    /// Decodes and routes one inbound frame.
    pub(crate) fn dispatch(&self, text: &str) -> Result<()> {
        let inbound = Inbound::decode(text)?;
        let mut out = Deliveries::default();

        {
            let mut state = self.state.lock();
            if state.closed {
                trace!("Ignoring frame after close");
                return Ok(());
            }
            state.route(inbound, self.options.flatten, &self.events, &mut out);
        }

        out.deliver();
        Ok(())
    }

    /// First half of disposal. Returns `false` if already closed.
    fn begin_shutdown(&self) -> bool {
        let mut out = Deliveries::default();
        if !self.state.lock().close(&mut out) {
            return false;
        }

        let _ = self.outgoing.send(Outgoing::Close);
        out.deliver();
        true
    }

    /// Second half of disposal.
    fn finish_shutdown(&self) {
        if let Some(callback) = self.on_close.lock().take() {
            callback();
        }

        info!(url = %self.url, "Connection disposed");
        self.events.emit(&crate::protocol::Event::disconnected(None));
    }

    /// Disposes without waiting for the transport.
    pub(crate) fn shutdown_now(&self) {
        if self.begin_shutdown() {
            self.finish_shutdown();
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Multiplexed connection to a remote debuggee.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url)
            .field("flatten", &self.inner.options.flatten)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Returns a builder for configuring a connection.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connects with default options.
    ///
    /// # Errors
    ///
    /// See [`ConnectionBuilder::connect`].
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        ConnectionBuilder::new().url(url).connect().await
    }

    /// Opens the socket, starts both tasks and waits for the ready signal.
    pub(crate) async fn open(
        url: String,
        options: ConnectionOptions,
        on_close: Option<CloseCallback>,
    ) -> Result<Self> {
        let stream = transport::open(&url, &options).await?;
        let (sink, source) = stream.split();

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let ready_timeout = options.ready_timeout;
        let inner = Arc::new(Inner::new(url, options, outgoing_tx, on_close));

        let writer = {
            let weak = Arc::downgrade(&inner);
            transport::spawn_writer(sink, outgoing_rx, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.shutdown_now();
                }
            })
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        // Both tasks hold weak references, so dropping the last handle
        // drops the queue sender and lets the writer close the socket.
        let reader = {
            let router = Arc::downgrade(&inner);
            let closer = Arc::downgrade(&inner);
            transport::spawn_reader(
                source,
                ready_tx,
                move |text| {
                    let Some(inner) = router.upgrade() else {
                        trace!("Connection dropped, ignoring frame");
                        return;
                    };
                    if let Err(e) = inner.dispatch(text) {
                        warn!(error = %e, "Failed to route inbound frame");
                    }
                },
                move || {
                    if let Some(inner) = closer.upgrade() {
                        inner.shutdown_now();
                    }
                },
            )
        };

        inner.tasks.lock().extend([writer, reader]);
        let connection = Self { inner };

        match timeout(ready_timeout, ready_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                connection.dispose().await;
                return Err(Error::connection("receive loop exited before ready"));
            }
            Err(_) => {
                connection.dispose().await;
                return Err(Error::connection_timeout(ready_timeout.as_millis() as u64));
            }
        }

        info!(
            url = %connection.inner.url,
            flatten = connection.inner.options.flatten,
            "Connection ready"
        );

        Ok(connection)
    }

    /// Disposes the connection.
    ///
    /// Rejects every pending call with [`Error::TargetClosed`], tears down
    /// every session, closes the socket and stops both tasks (each wait
    /// bounded by `close_timeout`), runs the close callback and emits
    /// `Disconnected`. Calling it again does nothing.
    pub async fn dispose(&self) {
        if !self.inner.begin_shutdown() {
            return;
        }

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        let close_timeout = self.inner.options.close_timeout;

        for mut task in tasks {
            if timeout(close_timeout, &mut task).await.is_err() {
                warn!(
                    timeout_ms = close_timeout.as_millis() as u64,
                    "Connection task did not stop in time, aborting"
                );
                task.abort();
            }
        }

        self.inner.finish_shutdown();
    }

    /// Returns `true` once disposal has started.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Returns the WebSocket URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns the options in use.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Root event bus (events without a session tag).
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}

// ============================================================================
// Connection - Calls
// ============================================================================

impl Connection {
    /// Issues a call and returns its handle without waiting.
    ///
    /// The ID is allocated and the frame queued before this returns, so
    /// IDs follow issuance order. On a closed connection the handle is
    /// already rejected with [`Error::TargetClosed`] and nothing is sent.
    pub fn call(&self, method: impl Into<String>, params: Option<Value>) -> PendingResponse {
        self.inner.call_root(method.into(), params)
    }

    /// Sends a call and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the debuggee answered with an error
    /// - [`Error::TargetClosed`] if the connection closed first
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.call(method, params).await
    }

    /// Sends a call and waits at most `limit` for its result.
    ///
    /// On timeout the call is forgotten; a late response is then reported
    /// as an unmatched response.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no response arrived in time
    /// - otherwise same as [`Connection::send`]
    pub async fn send_with_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        limit: Duration,
    ) -> Result<Value> {
        let method = method.into();
        let pending = self.call(method.as_str(), params);
        let id = pending.id();

        match timeout(limit, pending).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let _ = self.inner.state.lock().pending.remove(id);
                Err(Error::timeout(method, limit.as_millis() as u64))
            }
        }
    }

    /// Sends a typed command.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn execute(&self, command: impl Into<Command>) -> Result<Value> {
        let (method, params) = command.into().into_parts()?;
        self.send(method, params).await
    }

    async fn execute_as<T: DeserializeOwned>(&self, command: impl Into<Command>) -> Result<T> {
        let value = self.execute(command).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Number of calls pending at the connection root.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }
}

// ============================================================================
// Connection - Sessions
// ============================================================================

impl Connection {
    /// Attaches to a target and returns its session.
    ///
    /// In flat mode `flatten: true` is requested. If the debuggee already
    /// announced the session through `Target.attachedToTarget`, that
    /// session is returned instead of a duplicate. The session is
    /// registered while the response is routed, so a detach that follows
    /// the response is never lost.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the target cannot be attached
    /// - [`Error::SessionDetached`] if the target detached before this returned
    /// - [`Error::TargetClosed`] if the connection closed first
    pub async fn create_session(&self, target_id: impl Into<TargetId>) -> Result<Session> {
        let flatten = self.inner.options.flatten;
        let (method, params) = Command::from(TargetCommand::AttachToTarget {
            target_id: target_id.into(),
            flatten: flatten.then_some(true),
        })
        .into_parts()?;

        let attachment = Attachment {
            flat: flatten,
            parent: None,
        };
        let value = self
            .inner
            .call_root_with(method, params, Some(attachment))
            .await?;
        let attached: AttachToTargetResult = serde_json::from_value(value)?;

        Session::attached(&self.inner, attached.session_id)
    }

    /// Returns the attached session with this ID.
    #[must_use]
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        Session::lookup(&self.inner, session_id)
    }

    /// Returns every attached session, at any depth.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        let ids: Vec<SessionId> = self.inner.state.lock().sessions.keys().cloned().collect();
        ids.iter()
            .filter_map(|id| Session::lookup(&self.inner, id))
            .collect()
    }

    /// Number of attached sessions, at any depth.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }
}

// ============================================================================
// Connection - Target Helpers
// ============================================================================

impl Connection {
    /// Lists available targets.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn get_targets(&self) -> Result<Vec<TargetInfo>> {
        let result: GetTargetsResult = self.execute_as(TargetCommand::GetTargets).await?;
        Ok(result.target_infos)
    }

    /// Opens a new page target.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn create_target(&self, url: impl Into<String>) -> Result<TargetId> {
        let result: CreateTargetResult = self
            .execute_as(TargetCommand::CreateTarget { url: url.into() })
            .await?;
        Ok(result.target_id)
    }

    /// Closes a target.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn close_target(&self, target_id: impl Into<TargetId>) -> Result<()> {
        self.execute(TargetCommand::CloseTarget {
            target_id: target_id.into(),
        })
        .await?;
        Ok(())
    }

    /// Brings a target to the foreground.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn activate_target(&self, target_id: impl Into<TargetId>) -> Result<()> {
        self.execute(TargetCommand::ActivateTarget {
            target_id: target_id.into(),
        })
        .await?;
        Ok(())
    }

    /// Enables or disables target discovery events.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn set_discover_targets(&self, discover: bool) -> Result<()> {
        self.execute(TargetCommand::SetDiscoverTargets { discover })
            .await?;
        Ok(())
    }

    /// Enables or disables auto-attach, using this connection's addressing
    /// mode for the new sessions.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn set_auto_attach(&self, auto_attach: bool, wait_for_debugger: bool) -> Result<()> {
        self.execute(TargetCommand::SetAutoAttach {
            auto_attach,
            wait_for_debugger_on_start: wait_for_debugger,
            flatten: self.inner.options.flatten.then_some(true),
        })
        .await?;
        Ok(())
    }

    /// Queries the browser version.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn browser_version(&self) -> Result<BrowserVersion> {
        self.execute_as(BrowserCommand::GetVersion).await
    }
}

// ============================================================================
// Test Support
// ============================================================================

#[cfg(test)]
impl Connection {
    /// Builds a connection with no socket; the test reads the outgoing
    /// queue and injects inbound frames.
    pub(crate) fn detached(options: ConnectionOptions) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner::new("ws://test.invalid/".to_string(), options, tx, None));
        (Self { inner }, rx)
    }

    /// Routes a frame as if the reader had received it.
    pub(crate) fn inject(&self, frame: Value) {
        self.inner
            .dispatch(&frame.to_string())
            .expect("injected frame routes");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Reads the next queued frame as JSON.
    pub(crate) async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Value {
        match rx.recv().await {
            Some(Outgoing::Frame(text)) => serde_json::from_str(&text).expect("outgoing json"),
            other => panic!("expected frame, got {other:?}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
