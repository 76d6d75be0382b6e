//! Routing state of one connection.
//!
//! The connection owns a single flat arena of session records keyed by
//! [`SessionId`]. A record refers to its parent and children by key only,
//! so there are no reference cycles between sessions, and a session's
//! nesting depth never changes how it is looked up.
//!
//! # Inbound Routing
//!
//! For each classified frame, in this order:
//!
//! 1. `Target.attachedToTarget` (flat mode): register the announced session
//!    unless it already exists.
//! 2. `Target.detachedFromTarget`: tear the named session down.
//! 3. Tagged with a registered `sessionId`: hand to that session and stop.
//!    Tagged with an unknown one: drop.
//! 4. Response whose `id` is pending at the root: resolve or reject it.
//!    A successful attach registers its session in the same turn, unless
//!    a detach for that session was already announced.
//! 5. `Target.receivedMessageFromTarget` for a nested child: unwrap and
//!    route the inner message to that child.
//! 6. Anything else: emit on the root event bus.
//!
//! Sessions apply steps 4 to 6 against their own table, children and bus.
//!
//! All mutation happens under the connection lock; event handlers are
//! collected in [`Deliveries`] and run after the lock is released.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::events::EventBus;
use crate::identifiers::{CallId, SessionId};
use crate::protocol::{
    AttachedToTarget, DetachedFromTarget, Event, EventKind, Inbound, ReceivedMessageFromTarget,
};

use super::pending::{Attached, PendingTable};

// ============================================================================
// Constants
// ============================================================================

/// Announced detaches remembered for attach responses still in flight.
const RETIRED_CAPACITY: usize = 128;

// ============================================================================
// Deliveries
// ============================================================================

/// Events produced while routing, delivered once the lock is released.
#[derive(Default)]
pub(crate) struct Deliveries {
    events: Vec<(Arc<EventBus>, Event)>,
}

impl Deliveries {
    fn push(&mut self, bus: &Arc<EventBus>, event: Event) {
        self.events.push((Arc::clone(bus), event));
    }

    /// Runs every collected delivery in production order.
    pub(crate) fn deliver(self) {
        for (bus, event) in self.events {
            bus.emit(&event);
        }
    }
}

// ============================================================================
// SessionRecord
// ============================================================================

/// Arena entry for one attached session.
#[derive(Debug)]
pub(crate) struct SessionRecord {
    /// Session ID assigned by the debuggee.
    pub(crate) session_id: SessionId,
    /// Target type, when known.
    pub(crate) target_type: Option<String>,
    /// Flat (tagged) or nested (wrapped) addressing.
    pub(crate) flat: bool,
    /// Parent session key; `None` means the connection root.
    pub(crate) parent: Option<SessionId>,
    /// Child session keys.
    pub(crate) children: Vec<SessionId>,
    /// Calls issued through this session.
    pub(crate) pending: PendingTable,
    /// Session event subscribers.
    pub(crate) events: Arc<EventBus>,
    /// Nested-mode call counter.
    last_id: u64,
}

impl SessionRecord {
    pub(crate) fn new(
        session_id: SessionId,
        target_type: Option<String>,
        flat: bool,
        parent: Option<SessionId>,
    ) -> Self {
        Self {
            session_id,
            target_type,
            flat,
            parent,
            children: Vec::new(),
            pending: PendingTable::default(),
            events: Arc::new(EventBus::new()),
            last_id: 0,
        }
    }

    /// Allocates the next ID from this session's own counter.
    pub(crate) fn next_id(&mut self) -> CallId {
        self.last_id += 1;
        CallId::new(self.last_id)
    }
}

// ============================================================================
// State
// ============================================================================

/// Mutable routing state guarded by the connection lock.
#[derive(Debug, Default)]
pub(crate) struct State {
    /// Set once; nothing is sent or routed afterwards.
    pub(crate) closed: bool,
    /// Calls issued at the connection root.
    pub(crate) pending: PendingTable,
    /// Session arena.
    pub(crate) sessions: FxHashMap<SessionId, SessionRecord>,
    /// Most recent announced detaches, oldest first.
    retired: VecDeque<SessionId>,
}

// ============================================================================
// State - Session Directory
// ============================================================================

impl State {
    /// Registers a session and links it under its parent.
    ///
    /// An existing record with the same ID is kept as is.
    pub(crate) fn register(&mut self, record: SessionRecord) -> bool {
        if self.sessions.contains_key(&record.session_id) {
            return false;
        }

        if let Some(parent) = record
            .parent
            .as_ref()
            .and_then(|parent| self.sessions.get_mut(parent))
        {
            parent.children.push(record.session_id.clone());
        }

        debug!(
            session_id = %record.session_id,
            parent = ?record.parent.as_ref().map(SessionId::as_str),
            flat = record.flat,
            "Session registered"
        );

        self.sessions.insert(record.session_id.clone(), record);
        true
    }

    /// Registers the session created by a successful attach call.
    ///
    /// Skipped when the debuggee already announced its detach, or when the
    /// parent is gone. An announced record with the same ID is kept.
    fn register_attached(&mut self, attached: Attached) {
        let Attached {
            session_id,
            attachment,
        } = attached;

        if self.retired.contains(&session_id) {
            debug!(%session_id, "Attached session was already detached");
            return;
        }

        if let Some(parent) = &attachment.parent
            && !self.sessions.contains_key(parent)
        {
            debug!(%session_id, %parent, "Parent of attached session is gone");
            return;
        }

        if !self.register(SessionRecord::new(
            session_id.clone(),
            None,
            attachment.flat,
            attachment.parent,
        )) {
            trace!(%session_id, "Reusing announced session");
        }
    }

    fn retire(&mut self, session_id: SessionId) {
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(session_id);
    }

    /// Removes a session and all of its descendants.
    ///
    /// Pending calls are rejected with `TargetClosed` and each removed
    /// session emits `Disconnected`. Returns `false` if it was unknown.
    pub(crate) fn teardown(&mut self, session_id: &SessionId, out: &mut Deliveries) -> bool {
        let Some(mut record) = self.sessions.remove(session_id) else {
            return false;
        };

        if let Some(parent) = record
            .parent
            .as_ref()
            .and_then(|parent| self.sessions.get_mut(parent))
        {
            parent.children.retain(|child| child != session_id);
        }

        let failed = record.pending.fail_all();

        for child in std::mem::take(&mut record.children) {
            self.teardown(&child, out);
        }

        debug!(%session_id, failed, "Session closed");
        out.push(&record.events, Event::disconnected(Some(session_id.clone())));
        true
    }

    /// Marks the state closed and tears everything down.
    ///
    /// Returns `false` if it was already closed.
    pub(crate) fn close(&mut self, out: &mut Deliveries) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        let failed = self.pending.fail_all();

        let roots: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|record| {
                record
                    .parent
                    .as_ref()
                    .is_none_or(|parent| !self.sessions.contains_key(parent))
            })
            .map(|record| record.session_id.clone())
            .collect();

        for session_id in roots {
            self.teardown(&session_id, out);
        }

        debug!(failed, "Connection state closed");
        true
    }
}

// ============================================================================
// State - Inbound Routing
// ============================================================================

impl State {
    /// Routes one inbound frame received at the connection root.
    pub(crate) fn route(
        &mut self,
        inbound: Inbound,
        flatten: bool,
        root: &Arc<EventBus>,
        out: &mut Deliveries,
    ) {
        let (scope, message) = inbound.into_scope();

        if let Inbound::Event { method, params } = &message {
            match EventKind::from_method(method) {
                EventKind::AttachedToTarget if flatten => self.adopt(scope.as_ref(), params),
                EventKind::DetachedFromTarget => self.detach_announced(params, out),
                _ => {}
            }
        }

        match scope {
            Some(session_id) if self.sessions.contains_key(&session_id) => {
                self.route_session(&session_id, message, out);
            }
            Some(session_id) => {
                debug!(%session_id, "Dropping message for unknown session");
            }
            None => self.route_root(message, root, out),
        }
    }

    fn route_root(&mut self, message: Inbound, root: &Arc<EventBus>, out: &mut Deliveries) {
        let message = match self.pending.complete(message) {
            Ok(attached) => {
                if let Some(attached) = attached {
                    self.register_attached(attached);
                }
                return;
            }
            Err(message) => message,
        };

        match message {
            Inbound::Event { method, params } => {
                if EventKind::from_method(&method) == EventKind::ReceivedMessageFromTarget
                    && self.relay_inbound(None, &params, out)
                {
                    return;
                }
                out.push(root, Event::new(&method, params, None));
            }

            unmatched => {
                warn!(frame = %unmatched.response_value(), "Response matches no pending call");
                out.push(root, Event::unmatched(unmatched.response_value(), None));
            }
        }
    }

    /// Routes a message addressed to `session_id`.
    fn route_session(&mut self, session_id: &SessionId, message: Inbound, out: &mut Deliveries) {
        let (_, message) = message.into_scope();

        let Some(record) = self.sessions.get_mut(session_id) else {
            debug!(%session_id, "Dropping message for detached session");
            return;
        };

        let message = match record.pending.complete(message) {
            Ok(attached) => {
                if let Some(attached) = attached {
                    self.register_attached(attached);
                }
                return;
            }
            Err(message) => message,
        };
        let bus = Arc::clone(&record.events);

        match message {
            Inbound::Event { method, params } => match EventKind::from_method(&method) {
                EventKind::ReceivedMessageFromTarget
                    if self.relay_inbound(Some(session_id), &params, out) => {}

                EventKind::DetachedFromTarget => {
                    let detached = params.clone();
                    out.push(&bus, Event::new(&method, params, Some(session_id.clone())));
                    self.detach_announced(&detached, out);
                }

                _ => out.push(&bus, Event::new(&method, params, Some(session_id.clone()))),
            },

            unmatched => {
                warn!(
                    %session_id,
                    frame = %unmatched.response_value(),
                    "Response matches no pending session call"
                );
                out.push(
                    &bus,
                    Event::unmatched(unmatched.response_value(), Some(session_id.clone())),
                );
            }
        }
    }

    /// Unwraps `Target.receivedMessageFromTarget` for a nested child of
    /// `parent` (`None` = root).
    ///
    /// Returns `true` when the event was consumed, including when it names
    /// a session that is not a known child.
    fn relay_inbound(
        &mut self,
        parent: Option<&SessionId>,
        params: &Value,
        out: &mut Deliveries,
    ) -> bool {
        let payload = match ReceivedMessageFromTarget::deserialize(params) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Malformed Target.receivedMessageFromTarget");
                return false;
            }
        };

        let is_child = self
            .sessions
            .get(&payload.session_id)
            .is_some_and(|record| record.parent.as_ref() == parent);

        if !is_child {
            debug!(session_id = %payload.session_id, "Dropping nested message for unknown session");
            return true;
        }

        match Inbound::decode(&payload.message) {
            Ok(inner) => {
                trace!(session_id = %payload.session_id, "Nested message unwrapped");
                self.route_session(&payload.session_id, inner, out);
            }
            Err(e) => {
                warn!(session_id = %payload.session_id, error = %e, "Undecodable nested message");
            }
        }
        true
    }

    /// Registers a session announced by `Target.attachedToTarget`.
    fn adopt(&mut self, scope: Option<&SessionId>, params: &Value) {
        let payload = match AttachedToTarget::deserialize(params) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Malformed Target.attachedToTarget");
                return;
            }
        };

        if let Some(existing) = self.sessions.get_mut(&payload.session_id) {
            existing
                .target_type
                .get_or_insert(payload.target_info.target_type);
            trace!(session_id = %payload.session_id, "Attached session already registered");
            return;
        }

        let parent = scope
            .filter(|parent| self.sessions.contains_key(*parent))
            .cloned();

        self.register(SessionRecord::new(
            payload.session_id,
            Some(payload.target_info.target_type),
            true,
            parent,
        ));
    }

    fn detach_announced(&mut self, params: &Value, out: &mut Deliveries) {
        match DetachedFromTarget::deserialize(params) {
            Ok(payload) => {
                if !self.teardown(&payload.session_id, out) {
                    trace!(session_id = %payload.session_id, "Detached session already gone");
                }
                self.retire(payload.session_id);
            }
            Err(e) => warn!(error = %e, "Malformed Target.detachedFromTarget"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::oneshot;

    use crate::connection::pending::{Attachment, PendingResponse};
    use crate::error::Error;

    fn frame(value: Value) -> Inbound {
        Inbound::from_value(value).expect("classify")
    }

    fn attached(session_id: &str, target_type: &str) -> Value {
        json!({
            "method": "Target.attachedToTarget",
            "params": {
                "sessionId": session_id,
                "targetInfo": {"targetId": "T1", "type": target_type, "title": "", "url": "", "attached": true},
                "waitingForDebugger": false
            }
        })
    }

    fn call(table: &mut PendingTable, id: u64) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        table.insert(CallId::new(id), "Test.call".to_string(), tx, None);
        PendingResponse::new(CallId::new(id), rx)
    }

    fn attach_call(table: &mut PendingTable, id: u64, parent: Option<&str>) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        table.insert(
            CallId::new(id),
            "Target.attachToTarget".to_string(),
            tx,
            Some(Attachment {
                flat: true,
                parent: parent.map(SessionId::new),
            }),
        );
        PendingResponse::new(CallId::new(id), rx)
    }

    fn detached(session_id: &str) -> Value {
        json!({
            "method": "Target.detachedFromTarget",
            "params": {"sessionId": session_id, "targetId": "T1"}
        })
    }

    #[test]
    fn test_register_links_parent() {
        let mut state = State::default();
        state.register(SessionRecord::new(SessionId::new("A"), None, false, None));
        state.register(SessionRecord::new(
            SessionId::new("B"),
            None,
            false,
            Some(SessionId::new("A")),
        ));

        assert_eq!(state.sessions[&SessionId::new("A")].children, vec![SessionId::new("B")]);
        assert!(!state.register(SessionRecord::new(SessionId::new("B"), None, false, None)));
    }

    #[tokio::test]
    async fn test_teardown_cascades_to_children() {
        let mut state = State::default();
        state.register(SessionRecord::new(SessionId::new("A"), None, false, None));
        state.register(SessionRecord::new(
            SessionId::new("B"),
            None,
            false,
            Some(SessionId::new("A")),
        ));
        let child_call = call(
            &mut state.sessions.get_mut(&SessionId::new("B")).expect("B").pending,
            1,
        );

        let mut out = Deliveries::default();
        assert!(state.teardown(&SessionId::new("A"), &mut out));

        assert!(state.sessions.is_empty());
        assert_eq!(out.events.len(), 2);
        assert!(matches!(child_call.await, Err(Error::TargetClosed)));
    }

    #[test]
    fn test_flat_attach_is_idempotent() {
        let mut state = State::default();
        let root = Arc::new(EventBus::new());
        let mut out = Deliveries::default();

        state.route(frame(attached("S1", "page")), true, &root, &mut out);
        state.route(frame(attached("S1", "page")), true, &root, &mut out);

        assert_eq!(state.sessions.len(), 1);
        assert_eq!(
            state.sessions[&SessionId::new("S1")].target_type.as_deref(),
            Some("page")
        );
    }

    #[test]
    fn test_nested_mode_does_not_adopt() {
        let mut state = State::default();
        let root = Arc::new(EventBus::new());
        let mut out = Deliveries::default();

        state.route(frame(attached("S1", "page")), false, &root, &mut out);
        assert!(state.sessions.is_empty());
        assert_eq!(out.events.len(), 1);
    }

    #[test]
    fn test_scoped_attach_records_parent() {
        let mut state = State::default();
        let root = Arc::new(EventBus::new());
        let mut out = Deliveries::default();
        state.register(SessionRecord::new(SessionId::new("PAGE"), None, true, None));

        let mut announce = attached("WORKER", "worker");
        announce["sessionId"] = json!("PAGE");
        state.route(frame(announce), true, &root, &mut out);

        let worker = &state.sessions[&SessionId::new("WORKER")];
        assert_eq!(worker.parent, Some(SessionId::new("PAGE")));
        assert_eq!(
            state.sessions[&SessionId::new("PAGE")].children,
            vec![SessionId::new("WORKER")]
        );
    }

    #[test]
    fn test_unknown_session_traffic_dropped() {
        let mut state = State::default();
        let root = Arc::new(EventBus::new());
        let mut out = Deliveries::default();

        state.route(
            frame(json!({"method": "Page.loadEventFired", "params": {}, "sessionId": "GONE"})),
            true,
            &root,
            &mut out,
        );
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_unmatched_response_becomes_event() {
        let mut state = State::default();
        let root = Arc::new(EventBus::new());
        let mut out = Deliveries::default();

        state.route(frame(json!({"id": 42, "result": {}})), true, &root, &mut out);

        assert_eq!(out.events.len(), 1);
        let (_, event) = &out.events[0];
        assert_eq!(event.kind, EventKind::UnmatchedResponse);
        assert_eq!(event.params["id"], 42);
    }

    #[tokio::test]
    async fn test_close_fails_everything_once() {
        let mut state = State::default();
        let root_call = call(&mut state.pending, 1);
        state.register(SessionRecord::new(SessionId::new("S1"), None, true, None));

        let mut out = Deliveries::default();
        assert!(state.close(&mut out));
        assert!(!state.close(&mut out));

        assert!(state.sessions.is_empty());
        assert_eq!(out.events.len(), 1);
        assert!(matches!(root_call.await, Err(Error::TargetClosed)));
    }

    #[tokio::test]
    async fn test_attach_response_registers_in_routing_turn() {
        let mut state = State::default();
        let root = Arc::new(EventBus::new());
        let mut out = Deliveries::default();
        let pending = attach_call(&mut state.pending, 1, None);

        state.route(frame(json!({"id": 1, "result": {"sessionId": "S1"}})), true, &root, &mut out);

        let record = &state.sessions[&SessionId::new("S1")];
        assert!(record.flat);
        assert_eq!(record.parent, None);
        assert_eq!(pending.await.expect("result"), json!({"sessionId": "S1"}));
    }

    #[test]
    fn test_detach_announced_before_attach_response_wins() {
        let mut state = State::default();
        let root = Arc::new(EventBus::new());
        let mut out = Deliveries::default();
        let _pending = attach_call(&mut state.pending, 1, None);

        state.route(frame(attached("S1", "page")), true, &root, &mut out);
        state.route(frame(detached("S1")), true, &root, &mut out);
        state.route(frame(json!({"id": 1, "result": {"sessionId": "S1"}})), true, &root, &mut out);

        assert!(state.sessions.is_empty());
        assert_eq!(state.pending.len(), 0);
    }

    #[test]
    fn test_attach_under_vanished_parent_is_skipped() {
        let mut state = State::default();
        let root = Arc::new(EventBus::new());
        let mut out = Deliveries::default();
        let _pending = attach_call(&mut state.pending, 1, Some("GONE"));

        state.route(frame(json!({"id": 1, "result": {"sessionId": "S2"}})), true, &root, &mut out);
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn test_retired_ring_is_capped() {
        let mut state = State::default();
        for n in 0..=RETIRED_CAPACITY {
            state.retire(SessionId::new(format!("S{n}")));
        }

        assert_eq!(state.retired.len(), RETIRED_CAPACITY);
        assert!(!state.retired.contains(&SessionId::new("S0")));
        assert!(state.retired.contains(&SessionId::new(format!("S{RETIRED_CAPACITY}"))));
    }

    #[test]
    fn test_record_counter_starts_at_one() {
        let mut record = SessionRecord::new(SessionId::new("S"), None, false, None);
        assert_eq!(record.next_id(), CallId::new(1));
        assert_eq!(record.next_id(), CallId::new(2));
    }
}
