//! Connection to a remote debuggee.
//!
//! One [`Connection`] multiplexes every session over a single WebSocket.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`ConnectionBuilder`] and URL validation |
//! | `handle` | [`Connection`] handle, event loop wiring, disposal |
//! | `options` | [`ConnectionOptions`] and defaults |
//! | `pending` | Pending call tables and [`PendingResponse`] |
//! | `state` | Session arena and inbound routing |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent connection configuration.
pub mod builder;

/// Connection handle.
pub(crate) mod handle;

/// Connection options.
pub mod options;

/// Pending call bookkeeping.
pub(crate) mod pending;

/// Routing state.
pub(crate) mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionBuilder;
pub use handle::{CloseCallback, Connection};
pub use options::{ConnectionOptions, DEFAULT_CLOSE_TIMEOUT, DEFAULT_READY_TIMEOUT};
pub use pending::PendingResponse;
