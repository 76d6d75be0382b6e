//! Event identifiers and payloads.
//!
//! Events are notifications pushed by the remote debuggee. The wire name
//! (`Domain.event`) is mapped once to an [`EventKind`]; subscribers and the
//! router match on the kind, never on the raw string.
//!
//! # Typed Events
//!
//! | Domain | Events |
//! |--------|--------|
//! | `Target` | `attachedToTarget`, `detachedFromTarget`, `receivedMessageFromTarget`, `targetCreated`, `targetDestroyed`, `targetInfoChanged`, `targetCrashed` |
//! | `Inspector` | `detached`, `targetCrashed` |
//! | `Page` | `loadEventFired`, `domContentEventFired`, `frameNavigated` |
//! | `Runtime` | `consoleAPICalled`, `exceptionThrown` |
//! | `Network` | `requestWillBeSent`, `responseReceived`, `loadingFinished`, `loadingFailed` |
//!
//! Two kinds are synthesized locally: [`EventKind::Disconnected`] and
//! [`EventKind::UnmatchedResponse`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::{SessionId, TargetId};

use super::command::TargetInfo;

// ============================================================================
// EventKind
// ============================================================================

/// Enumerated event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `Target.attachedToTarget`
    AttachedToTarget,
    /// `Target.detachedFromTarget`
    DetachedFromTarget,
    /// `Target.receivedMessageFromTarget`
    ReceivedMessageFromTarget,
    /// `Target.targetCreated`
    TargetCreated,
    /// `Target.targetDestroyed`
    TargetDestroyed,
    /// `Target.targetInfoChanged`
    TargetInfoChanged,
    /// `Target.targetCrashed`
    TargetCrashed,
    /// `Inspector.detached`
    InspectorDetached,
    /// `Inspector.targetCrashed`
    InspectorTargetCrashed,
    /// `Page.loadEventFired`
    PageLoadEventFired,
    /// `Page.domContentEventFired`
    PageDomContentEventFired,
    /// `Page.frameNavigated`
    PageFrameNavigated,
    /// `Runtime.consoleAPICalled`
    RuntimeConsoleApiCalled,
    /// `Runtime.exceptionThrown`
    RuntimeExceptionThrown,
    /// `Network.requestWillBeSent`
    NetworkRequestWillBeSent,
    /// `Network.responseReceived`
    NetworkResponseReceived,
    /// `Network.loadingFinished`
    NetworkLoadingFinished,
    /// `Network.loadingFailed`
    NetworkLoadingFailed,
    /// The owning connection or session went away (local).
    Disconnected,
    /// A response arrived whose `id` matched no pending call (local).
    UnmatchedResponse,
    /// Any other event, by wire name.
    Other(String),
}

impl EventKind {
    /// Maps a wire method name to its identifier.
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        match method {
            "Target.attachedToTarget" => Self::AttachedToTarget,
            "Target.detachedFromTarget" => Self::DetachedFromTarget,
            "Target.receivedMessageFromTarget" => Self::ReceivedMessageFromTarget,
            "Target.targetCreated" => Self::TargetCreated,
            "Target.targetDestroyed" => Self::TargetDestroyed,
            "Target.targetInfoChanged" => Self::TargetInfoChanged,
            "Target.targetCrashed" => Self::TargetCrashed,
            "Inspector.detached" => Self::InspectorDetached,
            "Inspector.targetCrashed" => Self::InspectorTargetCrashed,
            "Page.loadEventFired" => Self::PageLoadEventFired,
            "Page.domContentEventFired" => Self::PageDomContentEventFired,
            "Page.frameNavigated" => Self::PageFrameNavigated,
            "Runtime.consoleAPICalled" => Self::RuntimeConsoleApiCalled,
            "Runtime.exceptionThrown" => Self::RuntimeExceptionThrown,
            "Network.requestWillBeSent" => Self::NetworkRequestWillBeSent,
            "Network.responseReceived" => Self::NetworkResponseReceived,
            "Network.loadingFinished" => Self::NetworkLoadingFinished,
            "Network.loadingFailed" => Self::NetworkLoadingFailed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the wire method name.
    ///
    /// Local kinds have no wire form and return an empty string.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::AttachedToTarget => "Target.attachedToTarget",
            Self::DetachedFromTarget => "Target.detachedFromTarget",
            Self::ReceivedMessageFromTarget => "Target.receivedMessageFromTarget",
            Self::TargetCreated => "Target.targetCreated",
            Self::TargetDestroyed => "Target.targetDestroyed",
            Self::TargetInfoChanged => "Target.targetInfoChanged",
            Self::TargetCrashed => "Target.targetCrashed",
            Self::InspectorDetached => "Inspector.detached",
            Self::InspectorTargetCrashed => "Inspector.targetCrashed",
            Self::PageLoadEventFired => "Page.loadEventFired",
            Self::PageDomContentEventFired => "Page.domContentEventFired",
            Self::PageFrameNavigated => "Page.frameNavigated",
            Self::RuntimeConsoleApiCalled => "Runtime.consoleAPICalled",
            Self::RuntimeExceptionThrown => "Runtime.exceptionThrown",
            Self::NetworkRequestWillBeSent => "Network.requestWillBeSent",
            Self::NetworkResponseReceived => "Network.responseReceived",
            Self::NetworkLoadingFinished => "Network.loadingFinished",
            Self::NetworkLoadingFailed => "Network.loadingFailed",
            Self::Disconnected | Self::UnmatchedResponse => "",
            Self::Other(method) => method,
        }
    }

    /// Returns the domain part of the wire name.
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &str {
        self.method().split('.').next().unwrap_or_default()
    }

    /// Returns `true` for kinds synthesized by this crate.
    #[inline]
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Disconnected | Self::UnmatchedResponse)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("<disconnected>"),
            Self::UnmatchedResponse => f.write_str("<unmatched-response>"),
            other => f.write_str(other.method()),
        }
    }
}

// ============================================================================
// Event
// ============================================================================

/// A notification delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Event {
    /// Identifier derived from the wire name.
    pub kind: EventKind,

    /// Event payload.
    pub params: Value,

    /// Session the event was scoped to, if any.
    pub session_id: Option<SessionId>,
}

impl Event {
    /// Creates an event from its wire form.
    #[must_use]
    pub fn new(method: &str, params: Value, session_id: Option<SessionId>) -> Self {
        Self {
            kind: EventKind::from_method(method),
            params,
            session_id,
        }
    }

    /// Creates the local disconnect notification.
    #[must_use]
    pub fn disconnected(session_id: Option<SessionId>) -> Self {
        Self {
            kind: EventKind::Disconnected,
            params: Value::Null,
            session_id,
        }
    }

    /// Creates the local notification for a response nobody awaited.
    ///
    /// `frame` is the whole response message.
    #[must_use]
    pub fn unmatched(frame: Value, session_id: Option<SessionId>) -> Self {
        Self {
            kind: EventKind::UnmatchedResponse,
            params: frame,
            session_id,
        }
    }

    /// Returns the wire method name.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        self.kind.method()
    }

    /// Decodes the payload according to the event kind.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if a typed payload does not match its
    /// expected shape.
    pub fn parse(&self) -> Result<ParsedEvent> {
        let params = || self.params.clone();
        Ok(match &self.kind {
            EventKind::AttachedToTarget => {
                ParsedEvent::AttachedToTarget(serde_json::from_value(params())?)
            }
            EventKind::DetachedFromTarget => {
                ParsedEvent::DetachedFromTarget(serde_json::from_value(params())?)
            }
            EventKind::ReceivedMessageFromTarget => {
                ParsedEvent::ReceivedMessageFromTarget(serde_json::from_value(params())?)
            }
            EventKind::TargetCreated => {
                let payload: TargetInfoPayload = serde_json::from_value(params())?;
                ParsedEvent::TargetCreated(payload.target_info)
            }
            EventKind::TargetInfoChanged => {
                let payload: TargetInfoPayload = serde_json::from_value(params())?;
                ParsedEvent::TargetInfoChanged(payload.target_info)
            }
            EventKind::TargetDestroyed => {
                let payload: TargetIdPayload = serde_json::from_value(params())?;
                ParsedEvent::TargetDestroyed(payload.target_id)
            }
            EventKind::TargetCrashed => {
                ParsedEvent::TargetCrashed(serde_json::from_value(params())?)
            }
            EventKind::InspectorDetached => {
                let payload: ReasonPayload = serde_json::from_value(params())?;
                ParsedEvent::InspectorDetached {
                    reason: payload.reason,
                }
            }
            EventKind::Disconnected => ParsedEvent::Disconnected,
            other => ParsedEvent::Unknown {
                method: other.method().to_string(),
                params: params(),
            },
        })
    }
}

// ============================================================================
// Typed Payloads
// ============================================================================

/// Payload of `Target.attachedToTarget`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedToTarget {
    /// Session created for the target.
    pub session_id: SessionId,
    /// Target description.
    pub target_info: TargetInfo,
    /// Whether the target is paused waiting for the debugger.
    #[serde(default)]
    pub waiting_for_debugger: bool,
}

/// Payload of `Target.detachedFromTarget`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTarget {
    /// Session that was detached.
    pub session_id: SessionId,
    /// Target, when reported.
    #[serde(default)]
    pub target_id: Option<TargetId>,
}

/// Payload of `Target.receivedMessageFromTarget`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessageFromTarget {
    /// Session that produced the message.
    pub session_id: SessionId,
    /// JSON-encoded inner message.
    pub message: String,
    /// Target, when reported.
    #[serde(default)]
    pub target_id: Option<TargetId>,
}

/// Payload of `Target.targetCrashed`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCrashed {
    /// Crashed target.
    pub target_id: TargetId,
    /// Termination status.
    #[serde(default)]
    pub status: String,
    /// Termination error code.
    #[serde(default)]
    pub error_code: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfoPayload {
    target_info: TargetInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetIdPayload {
    target_id: TargetId,
}

#[derive(Deserialize)]
struct ReasonPayload {
    #[serde(default)]
    reason: String,
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Decoded event payloads for type-safe handling.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    /// A session was attached.
    AttachedToTarget(AttachedToTarget),
    /// A session was detached.
    DetachedFromTarget(DetachedFromTarget),
    /// Nested-mode message from a session.
    ReceivedMessageFromTarget(ReceivedMessageFromTarget),
    /// A target appeared.
    TargetCreated(TargetInfo),
    /// A target changed.
    TargetInfoChanged(TargetInfo),
    /// A target went away.
    TargetDestroyed(TargetId),
    /// A target crashed.
    TargetCrashed(TargetCrashed),
    /// The inspector detached from the target.
    InspectorDetached {
        /// Reason given by the debuggee.
        reason: String,
    },
    /// The owner was torn down.
    Disconnected,
    /// Any event without a typed payload.
    Unknown {
        /// Wire method name.
        method: String,
        /// Raw params.
        params: Value,
    },
}

// ============================================================================
// Tests
// ============================================================================
