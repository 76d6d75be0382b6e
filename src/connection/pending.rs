//! Pending call bookkeeping.
//!
//! Every in-flight call is recorded in exactly one [`PendingTable`], owned
//! either by the connection root or by a session record. A call leaves its
//! table exactly once: when its response arrives, when its owner is torn
//! down, or when the call that was carrying it fails.
//!
//! An attach call carries an [`Attachment`]. Its successful response hands
//! the new session back to the router, which registers it in the same
//! routing turn, before any later frame can detach it.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{CallId, SessionId};
use crate::protocol::{AttachToTargetResult, Inbound};

// ============================================================================
// Types
// ============================================================================

/// Reply channel of a pending call.
pub(crate) type Reply = oneshot::Sender<Result<Value>>;

// ============================================================================
// Attachment
// ============================================================================

/// Where a session created by an attach call goes in the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attachment {
    /// Addressing mode of the new session.
    pub(crate) flat: bool,
    /// Parent session; `None` means the connection root.
    pub(crate) parent: Option<SessionId>,
}

/// A successfully answered attach call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attached {
    pub(crate) session_id: SessionId,
    pub(crate) attachment: Attachment,
}

// ============================================================================
// PendingCall
// ============================================================================

/// A call awaiting its response.
#[derive(Debug)]
pub(crate) struct PendingCall {
    /// Method name, kept for error reporting.
    method: String,
    /// Completion channel.
    reply: Reply,
    /// Set for attach calls.
    attachment: Option<Attachment>,
}

impl PendingCall {
    /// Completes the call. A dropped receiver is ignored.
    pub(crate) fn resolve(self, outcome: Result<Value>) {
        let _ = self.reply.send(outcome);
    }
}

// ============================================================================
// PendingTable
// ============================================================================

/// Pending calls of one owner, keyed by call ID.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    calls: FxHashMap<CallId, PendingCall>,
}

impl PendingTable {
    /// Records a call.
    pub(crate) fn insert(
        &mut self,
        id: CallId,
        method: String,
        reply: Reply,
        attachment: Option<Attachment>,
    ) {
        debug_assert!(!self.calls.contains_key(&id), "call id {id} reused while in flight");
        self.calls.insert(
            id,
            PendingCall {
                method,
                reply,
                attachment,
            },
        );
    }

    /// Removes a call without completing it.
    pub(crate) fn remove(&mut self, id: CallId) -> Option<PendingCall> {
        self.calls.remove(&id)
    }

    /// Completes the call answered by `message`.
    ///
    /// Returns the session to register when the call was a successful
    /// attach. Gives the message back when it is not a response, or when
    /// no recorded call has its ID.
    pub(crate) fn complete(
        &mut self,
        message: Inbound,
    ) -> std::result::Result<Option<Attached>, Inbound> {
        match message {
            Inbound::Response { id, result } => match self.calls.remove(&id) {
                Some(call) => {
                    trace!(%id, method = %call.method, "Call resolved");
                    let attached = call
                        .attachment
                        .clone()
                        .and_then(|attachment| attached_session(&result, attachment));
                    call.resolve(Ok(result));
                    Ok(attached)
                }
                None => Err(Inbound::Response { id, result }),
            },

            Inbound::Failure { id, error } => match self.calls.remove(&id) {
                Some(call) => {
                    trace!(%id, method = %call.method, code = error.code, "Call rejected");
                    let err = Error::remote(call.method.as_str(), error);
                    call.resolve(Err(err));
                    Ok(None)
                }
                None => Err(Inbound::Failure { id, error }),
            },

            other => Err(other),
        }
    }

    /// Rejects every call with [`Error::TargetClosed`]. Returns how many.
    pub(crate) fn fail_all(&mut self) -> usize {
        let count = self.calls.len();
        for (_, call) in self.calls.drain() {
            call.resolve(Err(Error::TargetClosed));
        }
        count
    }

    /// Number of calls in flight.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

fn attached_session(result: &Value, attachment: Attachment) -> Option<Attached> {
    match AttachToTargetResult::deserialize(result) {
        Ok(payload) => Some(Attached {
            session_id: payload.session_id,
            attachment,
        }),
        Err(e) => {
            warn!(error = %e, "Attach response without a session ID");
            None
        }
    }
}

// ============================================================================
// PendingResponse
// ============================================================================

/// Handle to an issued call.
///
/// Resolves with the call's `result`, the remote error, or
/// [`Error::TargetClosed`] if the owner was torn down first. Dropping the
/// handle does not cancel the call.
#[derive(Debug)]
#[must_use = "a call's outcome is only observable by awaiting its PendingResponse"]
pub struct PendingResponse {
    id: CallId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingResponse {
    pub(crate) fn new(id: CallId, rx: oneshot::Receiver<Result<Value>>) -> Self {
        Self { id, rx }
    }

    /// Creates a handle that is already rejected.
    pub(crate) fn rejected(id: CallId, error: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { id, rx }
    }

    /// The ID allocated to this call.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::TargetClosed)))
    }
}

// ============================================================================
// Tests
// ============================================================================
