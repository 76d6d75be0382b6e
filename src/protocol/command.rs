//! Typed commands for the domains the multiplexer itself drives.
//!
//! Only the `Target` and `Browser` domains are modelled here; every other
//! domain is sent as an opaque `(method, params)` pair.
//!
//! # Command Domains
//!
//! | Domain | Commands |
//! |--------|----------|
//! | `Target` | attach/detach, message indirection, discovery, lifecycle |
//! | `Browser` | version, close |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{SessionId, TargetId};

// ============================================================================
// Command Wrapper
// ============================================================================

/// All typed commands, grouped by domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// Target domain commands.
    Target(TargetCommand),
    /// Browser domain commands.
    Browser(BrowserCommand),
}

impl Command {
    /// Splits the command into its wire method and params.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails, or
    /// [`Error::Protocol`] if the serialized form has no method.
    pub fn into_parts(self) -> Result<(String, Option<Value>)> {
        let mut value = serde_json::to_value(self)?;
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::protocol("command serialized without a method"))?;
        let params = value.get_mut("params").map(Value::take);
        Ok((method, params))
    }
}

impl From<TargetCommand> for Command {
    fn from(command: TargetCommand) -> Self {
        Self::Target(command)
    }
}

impl From<BrowserCommand> for Command {
    fn from(command: BrowserCommand) -> Self {
        Self::Browser(command)
    }
}

// ============================================================================
// Target Commands
// ============================================================================

/// Target domain commands for attachment and target lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum TargetCommand {
    /// Attach to a target, yielding a session ID.
    #[serde(rename = "Target.attachToTarget")]
    AttachToTarget {
        /// Target to attach to.
        #[serde(rename = "targetId")]
        target_id: TargetId,
        /// Request flat session addressing.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        flatten: Option<bool>,
    },

    /// Detach a session.
    #[serde(rename = "Target.detachFromTarget")]
    DetachFromTarget {
        /// Session to detach.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    /// Deliver a serialized call to a nested-mode session.
    #[serde(rename = "Target.sendMessageToTarget")]
    SendMessageToTarget {
        /// Receiving session.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// JSON-encoded inner call.
        message: String,
    },

    /// Toggle `targetCreated`/`targetDestroyed`/`targetInfoChanged` events.
    #[serde(rename = "Target.setDiscoverTargets")]
    SetDiscoverTargets {
        /// Whether to discover targets.
        discover: bool,
    },

    /// Automatically attach to related targets.
    #[serde(rename = "Target.setAutoAttach")]
    SetAutoAttach {
        /// Whether to auto-attach.
        #[serde(rename = "autoAttach")]
        auto_attach: bool,
        /// Pause new targets until `Runtime.runIfWaitingForDebugger`.
        #[serde(rename = "waitForDebuggerOnStart")]
        wait_for_debugger_on_start: bool,
        /// Use flat sessions for auto-attached targets.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        flatten: Option<bool>,
    },

    /// List available targets.
    #[serde(rename = "Target.getTargets")]
    GetTargets,

    /// Open a new page target.
    #[serde(rename = "Target.createTarget")]
    CreateTarget {
        /// Initial URL.
        url: String,
    },

    /// Close a target.
    #[serde(rename = "Target.closeTarget")]
    CloseTarget {
        /// Target to close.
        #[serde(rename = "targetId")]
        target_id: TargetId,
    },

    /// Bring a target to the foreground.
    #[serde(rename = "Target.activateTarget")]
    ActivateTarget {
        /// Target to activate.
        #[serde(rename = "targetId")]
        target_id: TargetId,
    },
}

// ============================================================================
// Browser Commands
// ============================================================================

/// Browser domain commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum BrowserCommand {
    /// Query product and protocol versions.
    #[serde(rename = "Browser.getVersion")]
    GetVersion,

    /// Close the browser gracefully.
    #[serde(rename = "Browser.close")]
    Close,
}

// ============================================================================
// Result Types
// ============================================================================

/// Description of a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target ID.
    pub target_id: TargetId,
    /// Target type (`page`, `iframe`, `worker`, `browser`, ...).
    #[serde(rename = "type")]
    pub target_type: String,
    /// Page title.
    #[serde(default)]
    pub title: String,
    /// Current URL.
    #[serde(default)]
    pub url: String,
    /// Whether some client is attached.
    #[serde(default)]
    pub attached: bool,
    /// Opener target, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_id: Option<TargetId>,
    /// Browser context the target belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_context_id: Option<String>,
}

/// Result of `Target.attachToTarget`.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    /// Newly assigned session.
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// Result of `Target.getTargets`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetTargetsResult {
    /// All known targets.
    #[serde(rename = "targetInfos")]
    pub target_infos: Vec<TargetInfo>,
}

/// Result of `Target.createTarget`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTargetResult {
    /// The new target.
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
}

/// Result of `Browser.getVersion`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserVersion {
    /// Protocol version.
    #[serde(default)]
    pub protocol_version: String,
    /// Product name and version.
    #[serde(default)]
    pub product: String,
    /// Product revision.
    #[serde(default)]
    pub revision: String,
    /// User agent.
    #[serde(default)]
    pub user_agent: String,
    /// V8 version.
    #[serde(default)]
    pub js_version: String,
}

// ============================================================================
// Tests
// ============================================================================
