//! Per-target sessions.
//!
//! A [`Session`] is a handle to one entry of its connection's session
//! arena. It carries no routing state of its own, so a handle outliving its
//! session simply reports [`Error::SessionDetached`].
//!
//! # Addressing
//!
//! | Mode | Call ID | Outbound frame |
//! |------|---------|----------------|
//! | Flat | connection counter | `{"id", "method", "params", "sessionId"}` |
//! | Nested | session counter | wrapped in `Target.sendMessageToTarget` on the parent |
//!
//! In both modes the pending call is recorded in the session's own table,
//! so detaching one session only rejects that session's calls.
//!
//! # Example
//!
//! ```no_run
//! use cdp_mux::Connection;
//! use serde_json::json;
//!
//! # async fn example() -> cdp_mux::Result<()> {
//! let connection = Connection::connect("ws://127.0.0.1:9222/devtools/browser/5f1c").await?;
//! let target = connection.create_target("about:blank").await?;
//! let page = connection.create_session(target).await?;
//!
//! page.send("Page.navigate", Some(json!({ "url": "https://example.com" }))).await?;
//! page.detach().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::connection::handle::{Connection, Inner};
use crate::connection::pending::{Attachment, PendingResponse};
use crate::connection::state::{Deliveries, SessionRecord};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::identifiers::{CallId, SessionId, TargetId};
use crate::protocol::{AttachToTargetResult, Command, OutgoingCall, TargetCommand};

// ============================================================================
// Session
// ============================================================================

/// Handle to an attached session.
///
/// Cheap to clone; every clone addresses the same arena entry.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
    session_id: SessionId,
    flat: bool,
    events: Arc<EventBus>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("flat", &self.flat)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Builds a handle for a registered session.
    pub(crate) fn lookup(inner: &Arc<Inner>, session_id: &SessionId) -> Option<Self> {
        let state = inner.state.lock();
        let record = state.sessions.get(session_id)?;

        Some(Self {
            inner: Arc::clone(inner),
            session_id: record.session_id.clone(),
            flat: record.flat,
            events: Arc::clone(&record.events),
        })
    }

    /// Builds a handle for a session registered by an attach response.
    ///
    /// Fails if the session was torn down before the caller resumed.
    pub(crate) fn attached(inner: &Arc<Inner>, session_id: SessionId) -> Result<Self> {
        if let Some(session) = Self::lookup(inner, &session_id) {
            return Ok(session);
        }

        if inner.state.lock().closed {
            Err(Error::TargetClosed)
        } else {
            Err(Error::session_detached(session_id))
        }
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Session ID assigned by the debuggee.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns `true` for flat (tagged) addressing.
    #[inline]
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.flat
    }

    /// Session event bus.
    ///
    /// Receives this session's events and a final `Disconnected` on
    /// teardown.
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns a handle to the owning connection.
    #[must_use]
    pub fn connection(&self) -> Connection {
        Connection {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns `true` until the session is torn down.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        let state = self.inner.state.lock();
        !state.closed && state.sessions.contains_key(&self.session_id)
    }

    /// Target type, when known.
    #[must_use]
    pub fn target_type(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .sessions
            .get(&self.session_id)
            .and_then(|record| record.target_type.clone())
    }

    /// Parent session, or `None` when attached at the connection root.
    #[must_use]
    pub fn parent_id(&self) -> Option<SessionId> {
        self.inner
            .state
            .lock()
            .sessions
            .get(&self.session_id)
            .and_then(|record| record.parent.clone())
    }

    /// Directly nested child sessions.
    #[must_use]
    pub fn children(&self) -> Vec<Session> {
        let ids = self
            .inner
            .state
            .lock()
            .sessions
            .get(&self.session_id)
            .map(|record| record.children.clone())
            .unwrap_or_default();

        ids.iter()
            .filter_map(|id| Session::lookup(&self.inner, id))
            .collect()
    }

    /// Number of calls pending on this session.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .sessions
            .get(&self.session_id)
            .map_or(0, |record| record.pending.len())
    }
}

// ============================================================================
// Session - Calls
// ============================================================================

impl Session {
    /// Issues a call on this session and returns its handle.
    ///
    /// Must be called from within a tokio runtime: in nested mode a task
    /// watches the wrapping call so its failure reaches this one.
    pub fn call(&self, method: impl Into<String>, params: Option<Value>) -> PendingResponse {
        issue(&self.inner, &self.session_id, method.into(), params)
    }

    /// Sends a call and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the target answered with an error
    /// - [`Error::TargetClosed`] if the session or connection closed first
    /// - [`Error::SessionDetached`] if the session was already gone
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.call(method, params).await
    }

    /// Sends a call and waits at most `limit` for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no response arrived in time
    /// - otherwise same as [`Session::send`]
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
                if let Some(record) = self.inner.state.lock().sessions.get_mut(&self.session_id) {
                    let _ = record.pending.remove(id);
                }
                Err(Error::timeout(method, limit.as_millis() as u64))
            }
        }
    }

    /// Sends a typed command on this session.
    ///
    /// # Errors
    ///
    /// Same as [`Session::send`].
    pub async fn execute(&self, command: impl Into<Command>) -> Result<Value> {
        let (method, params) = command.into().into_parts()?;
        self.send(method, params).await
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Detaches from the target.
    ///
    /// Sends `Target.detachFromTarget` through the parent and, once it is
    /// acknowledged, tears the session and its descendants down.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionDetached`] if the session is already gone
    /// - [`Error::TargetClosed`] if the connection is closed
    /// - [`Error::Remote`] if the debuggee refused
    pub async fn detach(&self) -> Result<()> {
        let parent = {
            let state = self.inner.state.lock();
            if state.closed {
                return Err(Error::TargetClosed);
            }
            match state.sessions.get(&self.session_id) {
                Some(record) => record.parent.clone(),
                None => return Err(Error::session_detached(self.session_id.clone())),
            }
        };

        let (method, params) = Command::from(TargetCommand::DetachFromTarget {
            session_id: self.session_id.clone(),
        })
        .into_parts()?;

        match parent {
            Some(parent) => issue(&self.inner, &parent, method, params).await?,
            None => self.inner.call_root(method, params).await?,
        };

        let mut out = Deliveries::default();
        let removed = self.inner.state.lock().teardown(&self.session_id, &mut out);
        out.deliver();

        debug!(session_id = %self.session_id, removed, "Session detached");
        Ok(())
    }

    /// Registers a child session nested under this one.
    ///
    /// The child uses this session's addressing mode. An already
    /// registered child with the same ID is returned as is.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionDetached`] if this session is already gone
    /// - [`Error::TargetClosed`] if the connection is closed
    pub fn create_session(
        &self,
        target_type: impl Into<String>,
        session_id: impl Into<SessionId>,
    ) -> Result<Session> {
        self.adopt_child(Some(target_type.into()), session_id.into())
    }

    /// Attaches to a target through this session and registers the child.
    ///
    /// The child is registered while the response is routed.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionDetached`] if this session or the child detached
    ///   before this returned
    /// - otherwise same as [`Session::send`]
    pub async fn attach_to_target(&self, target_id: impl Into<TargetId>) -> Result<Session> {
        let (method, params) = Command::from(TargetCommand::AttachToTarget {
            target_id: target_id.into(),
            flatten: self.flat.then_some(true),
        })
        .into_parts()?;

        let attachment = Attachment {
            flat: self.flat,
            parent: Some(self.session_id.clone()),
        };
        let value = issue_with(&self.inner, &self.session_id, method, params, Some(attachment))
            .await?;
        let attached: AttachToTargetResult = serde_json::from_value(value)?;

        Session::attached(&self.inner, attached.session_id)
    }

    fn adopt_child(&self, target_type: Option<String>, session_id: SessionId) -> Result<Session> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::TargetClosed);
            }
            if !state.sessions.contains_key(&self.session_id) {
                return Err(Error::session_detached(self.session_id.clone()));
            }

            state.register(SessionRecord::new(
                session_id.clone(),
                target_type,
                self.flat,
                Some(self.session_id.clone()),
            ));
        }

        Session::lookup(&self.inner, &session_id).ok_or(Error::session_detached(session_id))
    }
}

// ============================================================================
// Call Issuance
// ============================================================================

/// Issues `method` on `session_id`, wrapping it for nested sessions.
fn issue(
    inner: &Arc<Inner>,
    session_id: &SessionId,
    method: String,
    params: Option<Value>,
) -> PendingResponse {
    issue_with(inner, session_id, method, params, None)
}

/// Same as [`issue`], registering the attached session on success when
/// `attachment` is set.
fn issue_with(
    inner: &Arc<Inner>,
    session_id: &SessionId,
    method: String,
    params: Option<Value>,
    attachment: Option<Attachment>,
) -> PendingResponse {
    let (tx, rx) = oneshot::channel();
    let mut state = inner.state.lock();

    if state.closed {
        return PendingResponse::rejected(CallId::new(0), Error::TargetClosed);
    }
    let Some(record) = state.sessions.get_mut(session_id) else {
        return PendingResponse::rejected(CallId::new(0), Error::session_detached(session_id.clone()));
    };

    if record.flat {
        let id = inner.next_id();
        let frame = match OutgoingCall::new(id, method.as_str(), params)
            .with_session(session_id.clone())
            .to_frame()
        {
            Ok(frame) => frame,
            Err(e) => return PendingResponse::rejected(id, e),
        };

        record.pending.insert(id, method, tx, attachment);
        drop(state);

        inner.transmit(frame);
        return PendingResponse::new(id, rx);
    }

    let id = record.next_id();
    let message = match OutgoingCall::new(id, method.as_str(), params).to_frame() {
        Ok(message) => message,
        Err(e) => return PendingResponse::rejected(id, e),
    };
    let wrapper = Command::from(TargetCommand::SendMessageToTarget {
        session_id: session_id.clone(),
        message,
    })
    .into_parts();

    let (wrapper_method, wrapper_params) = match wrapper {
        Ok(parts) => parts,
        Err(e) => return PendingResponse::rejected(id, e),
    };

    record.pending.insert(id, method, tx, attachment);
    let parent = record.parent.clone();
    drop(state);

    trace!(%session_id, %id, "Relaying nested call");

    let carrier = match parent {
        Some(parent) => issue(inner, &parent, wrapper_method, wrapper_params),
        None => inner.call_root(wrapper_method, wrapper_params),
    };

    let weak = Arc::downgrade(inner);
    let session_id = session_id.clone();
    tokio::spawn(async move {
        if let Err(e) = carrier.await
            && let Some(inner) = weak.upgrade()
        {
            abandon(&inner, &session_id, id, e);
        }
    });

    PendingResponse::new(id, rx)
}

/// Rejects a nested call whose carrier failed, if it is still pending.
fn abandon(inner: &Inner, session_id: &SessionId, id: CallId, error: Error) {
    let call = inner
        .state
        .lock()
        .sessions
        .get_mut(session_id)
        .and_then(|record| record.pending.remove(id));

    if let Some(call) = call {
        debug!(%session_id, %id, error = %error, "Nested call carrier failed");
        call.resolve(Err(error));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::connection::ConnectionOptions;
    use crate::connection::handle::test_support::next_frame;
    use crate::protocol::EventKind;
    use crate::transport::Outgoing;

    fn register(connection: &Connection, session_id: &str) -> Session {
        let flat = connection.options().flatten;
        connection.inner.state.lock().register(SessionRecord::new(
            SessionId::new(session_id),
            Some("page".to_string()),
            flat,
            None,
        ));
        connection
            .session(&SessionId::new(session_id))
            .expect("registered")
    }

    /// Reads a `Target.sendMessageToTarget` frame and returns the wrapper
    /// frame and its decoded inner call.
    async fn next_wrapped(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> (Value, Value) {
        let frame = next_frame(rx).await;
        assert_eq!(frame["method"], "Target.sendMessageToTarget");
        let inner: Value =
            serde_json::from_str(frame["params"]["message"].as_str().expect("message"))
                .expect("inner json");
        (frame, inner)
    }

    fn relayed(session_id: &str, message: Value) -> Value {
        json!({
            "method": "Target.receivedMessageFromTarget",
            "params": {"sessionId": session_id, "message": message.to_string()}
        })
    }

    #[tokio::test]
    async fn test_flat_call_is_tagged_and_resolved() {
        let (connection, mut rx) = Connection::detached(ConnectionOptions::new());
        let _ = connection.call("Browser.getVersion", None);
        let _ = next_frame(&mut rx).await;

        let session = register(&connection, "S1");
        let pending = session.call("Runtime.evaluate", Some(json!({"expression": "1+1"})));

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["id"], 2);
        assert_eq!(frame["sessionId"], "S1");
        assert_eq!(session.pending_count(), 1);
        assert_eq!(connection.pending_count(), 1);

        connection.inject(json!({"id": 2, "result": {"value": 2}, "sessionId": "S1"}));
        assert_eq!(pending.await.expect("result"), json!({"value": 2}));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_nested_call_is_wrapped_and_unwrapped() {
        let (connection, mut rx) = Connection::detached(ConnectionOptions::nested());
        let session = register(&connection, "S2");

        let pending = session.call("Page.navigate", Some(json!({"url": "https://example.com"})));

        let (wrapper, inner) = next_wrapped(&mut rx).await;
        assert_eq!(wrapper["params"]["sessionId"], "S2");
        assert!(wrapper.get("sessionId").is_none());
        assert_eq!(inner["id"], 1);
        assert_eq!(inner["method"], "Page.navigate");
        assert_eq!(inner["params"]["url"], "https://example.com");

        connection.inject(json!({"id": wrapper["id"], "result": {}}));
        connection.inject(relayed("S2", json!({"id": 1, "result": {"frameId": "F1"}})));

        assert_eq!(pending.await.expect("result"), json!({"frameId": "F1"}));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_with_timeout_clears_session_call() {
        let (connection, _rx) = Connection::detached(ConnectionOptions::new());
        let session = register(&connection, "S1");

        let err = session
            .send_with_timeout("Runtime.evaluate", None, Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(session.pending_count(), 0);
        assert!(session.is_attached());
    }

    #[tokio::test]
    async fn test_nested_counters_are_per_session() {
        let (connection, mut rx) = Connection::detached(ConnectionOptions::nested());
        let a = register(&connection, "A");
        let b = register(&connection, "B");

        let first = a.call("X.x", None);
        let second = b.call("X.x", None);
        let third = a.call("X.x", None);

        assert_eq!(first.id().get(), 1);
        assert_eq!(second.id().get(), 1);
        assert_eq!(third.id().get(), 2);

        let (_, inner) = next_wrapped(&mut rx).await;
        assert_eq!(inner["id"], 1);
    }

    #[tokio::test]
    async fn test_nested_carrier_failure_rejects_inner_call() {
        let (connection, mut rx) = Connection::detached(ConnectionOptions::nested());
        let session = register(&connection, "S2");

        let pending = session.call("Page.reload", None);
        let (wrapper, _) = next_wrapped(&mut rx).await;

        connection.inject(json!({
            "id": wrapper["id"],
            "error": {"code": -32602, "message": "No session with given id"}
        }));

        match pending.await {
            Err(Error::Remote { method, message, .. }) => {
                assert_eq!(method, "Target.sendMessageToTarget");
                assert_eq!(message, "No session with given id");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_grandchild_traffic_is_wrapped_twice() {
        let (connection, mut rx) = Connection::detached(ConnectionOptions::nested());
        let page = register(&connection, "S1");
        let frame = page.create_session("iframe", "S3").expect("child");

        assert_eq!(frame.parent_id(), Some(SessionId::new("S1")));
        assert_eq!(page.children().len(), 1);

        let pending = frame.call("Runtime.evaluate", Some(json!({"expression": "3"})));

        let (outer, middle) = next_wrapped(&mut rx).await;
        assert_eq!(outer["params"]["sessionId"], "S1");
        assert_eq!(middle["method"], "Target.sendMessageToTarget");
        assert_eq!(middle["params"]["sessionId"], "S3");

        let innermost: Value =
            serde_json::from_str(middle["params"]["message"].as_str().expect("message"))
                .expect("innermost json");
        assert_eq!(innermost["id"], 1);
        assert_eq!(innermost["method"], "Runtime.evaluate");

        connection.inject(relayed(
            "S1",
            relayed("S3", json!({"id": 1, "result": {"value": 3}})),
        ));

        assert_eq!(pending.await.expect("result"), json!({"value": 3}));
    }

    #[tokio::test]
    async fn test_flat_and_nested_resolve_identically() {
        let result = json!({"result": {"type": "number", "value": 42}});

        let (flat, mut flat_rx) = Connection::detached(ConnectionOptions::new());
        let flat_session = register(&flat, "S");
        let flat_call = flat_session.call("Runtime.evaluate", None);
        let frame = next_frame(&mut flat_rx).await;
        flat.inject(json!({"id": frame["id"], "result": result, "sessionId": "S"}));

        let (nested, mut nested_rx) = Connection::detached(ConnectionOptions::nested());
        let nested_session = register(&nested, "S");
        let nested_call = nested_session.call("Runtime.evaluate", None);
        let (_, inner) = next_wrapped(&mut nested_rx).await;
        nested.inject(relayed("S", json!({"id": inner["id"], "result": result})));

        assert_eq!(
            flat_call.await.expect("flat"),
            nested_call.await.expect("nested")
        );
    }

    #[tokio::test]
    async fn test_detached_notification_rejects_pending_calls() {
        let (connection, _rx) = Connection::detached(ConnectionOptions::new());
        let session = register(&connection, "S1");
        let sibling = register(&connection, "S9");

        let doomed = session.call("Page.navigate", None);
        let survivor = sibling.call("Page.reload", None);

        connection.inject(json!({
            "method": "Target.detachedFromTarget",
            "params": {"sessionId": "S1"}
        }));

        assert!(matches!(doomed.await, Err(Error::TargetClosed)));
        assert!(!session.is_attached());
        assert!(sibling.is_attached());
        assert_eq!(sibling.pending_count(), 1);
        assert_eq!(connection.session_count(), 1);

        let err = session.send("Page.reload", None).await.unwrap_err();
        assert!(matches!(err, Error::SessionDetached { .. }));
        drop(survivor);
    }

    #[tokio::test]
    async fn test_nested_detached_notification_cascades() {
        let (connection, _rx) = Connection::detached(ConnectionOptions::nested());
        let page = register(&connection, "S1");
        let child = page.create_session("worker", "S4").expect("child");

        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        child.events().on(EventKind::Disconnected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pending = child.call("Runtime.enable", None);

        connection.inject(json!({
            "method": "Target.detachedFromTarget",
            "params": {"sessionId": "S1"}
        }));

        assert!(matches!(pending.await, Err(Error::TargetClosed)));
        assert_eq!(connection.session_count(), 0);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detach_removes_session_after_ack() {
        let (connection, mut rx) = Connection::detached(ConnectionOptions::new());
        let session = register(&connection, "S1");

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.detach().await }
        });

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["method"], "Target.detachFromTarget");
        assert_eq!(frame["params"]["sessionId"], "S1");
        assert!(frame.get("sessionId").is_none());
        assert!(session.is_attached());

        connection.inject(json!({"id": frame["id"], "result": {}}));
        task.await.expect("join").expect("detach");

        assert!(!session.is_attached());
        let err = session.detach().await.unwrap_err();
        assert!(matches!(err, Error::SessionDetached { .. }));
    }

    #[tokio::test]
    async fn test_session_events_are_scoped() {
        let (connection, _rx) = Connection::detached(ConnectionOptions::new());
        let session = register(&connection, "S1");

        let root_hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&root_hits);
        connection.events().on(EventKind::PageLoadEventFired, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let next = session.events().next(EventKind::PageLoadEventFired);
        connection.inject(json!({
            "method": "Page.loadEventFired",
            "params": {"timestamp": 12.5},
            "sessionId": "S1"
        }));

        let event = next.await.expect("event");
        assert_eq!(event.session_id, Some(SessionId::new("S1")));
        assert_eq!(event.params["timestamp"], 12.5);
        assert_eq!(root_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_attached_announcement_is_reused_by_create_session() {
        let (connection, mut rx) = Connection::detached(ConnectionOptions::new());

        let task = tokio::spawn({
            let connection = connection.clone();
            async move { connection.create_session("T1").await }
        });
        let frame = next_frame(&mut rx).await;

        connection.inject(json!({
            "method": "Target.attachedToTarget",
            "params": {
                "sessionId": "S1",
                "targetInfo": {"targetId": "T1", "type": "page", "title": "", "url": "", "attached": true},
                "waitingForDebugger": false
            }
        }));
        let announced = connection.session(&SessionId::new("S1")).expect("announced");

        connection.inject(json!({"id": frame["id"], "result": {"sessionId": "S1"}}));
        let created = task.await.expect("join").expect("session");

        assert_eq!(connection.session_count(), 1);
        assert_eq!(created.target_type().as_deref(), Some("page"));
        assert!(std::ptr::eq(created.events(), announced.events()));
    }

    #[tokio::test]
    async fn test_attach_to_target_registers_child() {
        let (connection, mut rx) = Connection::detached(ConnectionOptions::new());
        let page = register(&connection, "S1");

        let task = tokio::spawn({
            let page = page.clone();
            async move { page.attach_to_target("W1").await }
        });
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["method"], "Target.attachToTarget");
        assert_eq!(frame["sessionId"], "S1");

        connection.inject(json!({"id": frame["id"], "result": {"sessionId": "S5"}, "sessionId": "S1"}));
        let worker = connection.session(&SessionId::new("S5")).expect("registered while routed");
        assert_eq!(worker.parent_id(), Some(SessionId::new("S1")));

        let child = task.await.expect("join").expect("child");
        assert_eq!(child.id(), &SessionId::new("S5"));
        assert_eq!(page.children().len(), 1);
    }

    #[tokio::test]
    async fn test_attach_to_target_loses_race_with_detach() {
        let (connection, mut rx) = Connection::detached(ConnectionOptions::new());
        let page = register(&connection, "S1");

        let task = tokio::spawn({
            let page = page.clone();
            async move { page.attach_to_target("W1").await }
        });
        let frame = next_frame(&mut rx).await;

        connection.inject(json!({"id": frame["id"], "result": {"sessionId": "S5"}, "sessionId": "S1"}));
        connection.inject(json!({
            "method": "Target.detachedFromTarget",
            "params": {"sessionId": "S5"}
        }));

        let err = task.await.expect("join").unwrap_err();
        assert!(matches!(err, Error::SessionDetached { .. }));
        assert!(page.children().is_empty());
        assert_eq!(connection.session_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_rejects_root_and_session_calls() {
        let (connection, _rx) = Connection::detached(ConnectionOptions::new());
        let session = register(&connection, "S1");

        let first = connection.call("A.a", None);
        let second = connection.call("B.b", None);
        let third = session.call("C.c", None);

        connection.dispose().await;

        for pending in [first, second, third] {
            assert!(matches!(pending.await, Err(Error::TargetClosed)));
        }
        assert!(!session.is_attached());
        assert!(matches!(session.send("D.d", None).await, Err(Error::TargetClosed)));
    }
}
