//! DevTools protocol message types.
//!
//! This module defines the message format exchanged with the remote
//! debuggee. Domain payloads stay opaque JSON; only the messages the
//! multiplexer itself reads or writes are typed.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `OutgoingCall` | Local → Remote | Command call |
//! | `Inbound::Response` | Remote → Local | Command result |
//! | `Inbound::Failure` | Remote → Local | Command error |
//! | `Inbound::Event` | Remote → Local | Push notification |
//!
//! # Method Naming
//!
//! Commands and events follow `Domain.name` format:
//!
//! - `Target.attachToTarget`
//! - `Page.navigate`
//! - `Network.requestWillBeSent`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Typed Target/Browser commands and results |
//! | `event` | Event identifiers and typed payloads |
//! | `message` | Outgoing call and inbound classification |

// ============================================================================
// Submodules
// ============================================================================

/// Typed commands and their results.
pub mod command;

/// Event identifiers and payloads.
pub mod event;

/// Outgoing call and inbound frame types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{
    AttachToTargetResult, BrowserCommand, BrowserVersion, Command, CreateTargetResult,
    GetTargetsResult, TargetCommand, TargetInfo,
};
pub use event::{
    AttachedToTarget, DetachedFromTarget, Event, EventKind, ParsedEvent,
    ReceivedMessageFromTarget, TargetCrashed,
};
pub use message::{Inbound, OutgoingCall, RemoteError};
