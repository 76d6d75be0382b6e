//! WebSocket transport layer.
//!
//! This module owns the single duplex WebSocket to the remote debuggee.
//! It knows nothing about calls or sessions: inbound text frames are handed
//! to a callback, outbound frames are drained from a queue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   Outgoing queue   ┌──────────────┐
//! │ Connection /     │───────────────────►│ writer task  │──┐
//! │ Session (send)   │                    └──────────────┘  │  WebSocket
//! │                  │   on_frame(&str)   ┌──────────────┐  ├─────────────► debuggee
//! │ router           │◄───────────────────│ reader task  │◄─┘
//! └──────────────────┘                    └──────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. [`open`] performs the handshake with message size caps removed
//! 2. [`spawn_writer`] drains the queue; a failed write reports once
//! 3. [`spawn_reader`] signals readiness, feeds frames in arrival order,
//!    and reports stream closure exactly once

// ============================================================================
// Submodules
// ============================================================================

/// Socket handshake and I/O tasks.
pub(crate) mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub(crate) use socket::{Outgoing, open, spawn_reader, spawn_writer};
