//! Wire message types.
//!
//! Defines the outgoing call frame and the classification of inbound frames
//! exchanged with the remote debuggee.
//!
//! # Format
//!
//! | Direction | Shape |
//! |-----------|-------|
//! | Outgoing call | `{"id": 1, "method": "Domain.command", "params": {..}, "sessionId"?: ".."}` |
//! | Success | `{"id": 1, "result": {..}, "sessionId"?: ".."}` |
//! | Failure | `{"id": 1, "error": {"code": -32000, "message": "..", "data"?: ..}}` |
//! | Event | `{"method": "Domain.event", "params": {..}, "sessionId"?: ".."}` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::identifiers::{CallId, SessionId};

// ============================================================================
// OutgoingCall
// ============================================================================

/// A call from the local end to the remote debuggee.
///
/// `session_id` is only set for calls addressed to a flat-mode session.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingCall {
    /// Correlation ID, unique among the owner's in-flight calls.
    pub id: CallId,

    /// Method in `Domain.command` format.
    pub method: String,

    /// Command parameters (empty object when none were given).
    pub params: Value,

    /// Flat-mode session tag.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl OutgoingCall {
    /// Creates an untagged call.
    #[inline]
    #[must_use]
    pub fn new(id: CallId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params: params.unwrap_or_else(|| Value::Object(Map::new())),
            session_id: None,
        }
    }

    /// Tags the call with a flat-mode session ID.
    #[inline]
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Serializes the call to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the params cannot be serialized.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// RemoteError
// ============================================================================

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// JSON-RPC style error code.
    #[serde(default)]
    pub code: i64,

    /// Human readable message.
    pub message: String,

    /// Optional details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Inbound
// ============================================================================

/// Raw frame shape before classification.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<CallId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RemoteError>,
    #[serde(rename = "sessionId", default)]
    session_id: Option<SessionId>,
}

/// An inbound frame classified before any routing happens.
///
/// A frame tagged with `sessionId` is wrapped in [`Inbound::SessionScoped`];
/// the inner message never carries a second tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Successful call response.
    Response {
        /// Call being answered.
        id: CallId,
        /// Result payload.
        result: Value,
    },

    /// Failed call response.
    Failure {
        /// Call being answered.
        id: CallId,
        /// Remote error.
        error: RemoteError,
    },

    /// Push notification.
    Event {
        /// Event name in `Domain.event` format.
        method: String,
        /// Event payload.
        params: Value,
    },

    /// Message addressed to a flat-mode session.
    SessionScoped {
        /// Session the message belongs to.
        session_id: SessionId,
        /// The untagged message.
        message: Box<Inbound>,
    },
}

impl Inbound {
    /// Decodes and classifies a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the frame is not a JSON object
    /// - [`Error::Protocol`] if it has neither `id` nor `method`
    pub fn decode(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Self::classify(raw)
    }

    /// Classifies an already decoded JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`Inbound::decode`].
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawFrame = serde_json::from_value(value)?;
        Self::classify(raw)
    }

    fn classify(raw: RawFrame) -> Result<Self> {
        let message = match (raw.id, raw.method) {
            (Some(id), _) => match raw.error {
                Some(error) => Self::Failure { id, error },
                None => Self::Response {
                    id,
                    result: raw.result.unwrap_or(Value::Null),
                },
            },
            (None, Some(method)) => Self::Event {
                method,
                params: raw.params.unwrap_or(Value::Null),
            },
            (None, None) => {
                return Err(Error::protocol("frame has neither `id` nor `method`"));
            }
        };

        Ok(match raw.session_id {
            Some(session_id) => Self::SessionScoped {
                session_id,
                message: Box::new(message),
            },
            None => message,
        })
    }

    /// Splits off the session tag, if any.
    #[must_use]
    pub fn into_scope(self) -> (Option<SessionId>, Inbound) {
        match self {
            Self::SessionScoped {
                session_id,
                message,
            } => (Some(session_id), *message),
            other => (None, other),
        }
    }

    /// Returns the event method, looking through a session tag.
    #[must_use]
    pub fn event_method(&self) -> Option<&str> {
        match self {
            Self::Event { method, .. } => Some(method),
            Self::SessionScoped { message, .. } => message.event_method(),
            _ => None,
        }
    }

    /// Rebuilds the JSON form of a response, used when it matches no call.
    #[must_use]
    pub fn response_value(&self) -> Value {
        match self {
            Self::Response { id, result } => json!({ "id": id, "result": result }),
            Self::Failure { id, error } => json!({ "id": id, "error": error }),
            Self::Event { method, params } => json!({ "method": method, "params": params }),
            Self::SessionScoped {
                session_id,
                message,
            } => {
                let mut value = message.response_value();
                if let Value::Object(map) = &mut value {
                    map.insert("sessionId".to_string(), json!(session_id));
                }
                value
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_call_serialization() {
        let call = OutgoingCall::new(CallId::new(1), "Browser.getVersion", None);
        let value: Value = serde_json::from_str(&call.to_frame().expect("frame")).expect("json");

        assert_eq!(value["id"], 1);
        assert_eq!(value["method"], "Browser.getVersion");
        assert_eq!(value["params"], json!({}));
        assert!(value.get("sessionId").is_none());
    }

    #[test]
    fn test_outgoing_call_with_session() {
        let call = OutgoingCall::new(
            CallId::new(4),
            "Page.navigate",
            Some(json!({ "url": "https://example.com" })),
        )
        .with_session(SessionId::new("S1"));
        let value: Value = serde_json::from_str(&call.to_frame().expect("frame")).expect("json");

        assert_eq!(value["sessionId"], "S1");
        assert_eq!(value["params"]["url"], "https://example.com");
    }

    #[test]
    fn test_decode_response() {
        let inbound = Inbound::decode(r#"{"id":1,"result":{"product":"Chrome/100"}}"#)
            .expect("decode");

        assert_eq!(
            inbound,
            Inbound::Response {
                id: CallId::new(1),
                result: json!({ "product": "Chrome/100" }),
            }
        );
    }

    #[test]
    fn test_decode_failure() {
        let inbound = Inbound::decode(
            r#"{"id":3,"error":{"code":-32601,"message":"'Foo.bar' wasn't found"}}"#,
        )
        .expect("decode");

        match inbound {
            Inbound::Failure { id, error } => {
                assert_eq!(id, CallId::new(3));
                assert_eq!(error.code, -32601);
                assert_eq!(error.message, "'Foo.bar' wasn't found");
                assert!(error.data.is_none());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_session_scoped_event() {
        let inbound = Inbound::decode(
            r#"{"method":"Page.loadEventFired","params":{"timestamp":1.5},"sessionId":"S1"}"#,
        )
        .expect("decode");

        assert_eq!(inbound.event_method(), Some("Page.loadEventFired"));
        let (session_id, message) = inbound.into_scope();
        assert_eq!(session_id, Some(SessionId::new("S1")));
        assert!(matches!(message, Inbound::Event { .. }));
    }

    #[test]
    fn test_decode_rejects_shapeless_frame() {
        let err = Inbound::decode(r#"{"params":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = Inbound::decode("not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_response_value_keeps_session_tag() {
        let inbound = Inbound::decode(r#"{"id":9,"result":{},"sessionId":"S2"}"#).expect("decode");
        let value = inbound.response_value();
        assert_eq!(value["id"], 9);
        assert_eq!(value["sessionId"], "S2");
    }
}
