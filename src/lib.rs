//! cdp-mux - Chrome DevTools Protocol connection and session multiplexer.
//!
//! This library keeps one WebSocket to a remote debuggee and multiplexes
//! any number of per-target sessions over it, correlating every call with
//! its response and routing every event to the session it belongs to.
//!
//! # Architecture
//!
//! - **Connection**: owns the socket, allocates call IDs, owns the session
//!   arena and routes inbound frames
//! - **Session**: handle to one attached target; calls are tagged with its
//!   `sessionId` (flat mode) or wrapped in `Target.sendMessageToTarget`
//!   (nested mode)
//!
//! Key design principles:
//!
//! - Each [`Connection`] owns: WebSocket + reader task + writer task
//! - Every pending call belongs to exactly one owner and leaves it once
//! - Tearing down an owner rejects its calls with [`Error::TargetClosed`]
//! - Event-driven (no polling)
//!
//! # Quick Start
//!
//! ```no_run
//! use cdp_mux::{Connection, EventKind, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::builder()
//!         .url("ws://127.0.0.1:9222/devtools/browser/5f1c")
//!         .connect()
//!         .await?;
//!
//!     let version = connection.browser_version().await?;
//!     println!("Connected to {}", version.product);
//!
//!     let target = connection.create_target("https://example.com").await?;
//!     let page = connection.create_session(target).await?;
//!
//!     let loaded = page.events().next(EventKind::PageLoadEventFired);
//!     page.send("Page.enable", None).await?;
//!     loaded.await?;
//!
//!     connection.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | [`Connection`], builder, options |
//! | [`session`] | [`Session`] handles |
//! | [`events`] | [`EventBus`] subscriptions |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message, command and event types |
//! | `transport` | WebSocket I/O tasks (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Connection handle, configuration and routing.
///
/// Use [`Connection::builder()`] to open a configured connection.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Event subscriptions.
pub mod events;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire message types.
pub mod protocol;

/// Per-target sessions.
pub mod session;

/// WebSocket transport layer.
pub(crate) mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{
    CloseCallback, Connection, ConnectionBuilder, ConnectionOptions, DEFAULT_CLOSE_TIMEOUT,
    DEFAULT_READY_TIMEOUT, PendingResponse,
};

// Session types
pub use session::Session;

// Event types
pub use events::{EventBus, EventFilter, EventHandler, NextEvent};
pub use protocol::{Event, EventKind, ParsedEvent};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CallId, SessionId, SubscriptionId, TargetId};
