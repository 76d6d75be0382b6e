//! Connection configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use cdp_mux::ConnectionOptions;
//!
//! let options = ConnectionOptions::new()
//!     .with_flatten(false)
//!     .with_close_timeout(Duration::from_secs(5));
//!
//! assert!(!options.flatten);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default bound on the close handshake and task shutdown during disposal.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on waiting for the receive loop to start.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Connection behaviour options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Address sessions by a `sessionId` tag on each frame (flat mode)
    /// instead of wrapping their traffic in `Target.sendMessageToTarget`.
    pub flatten: bool,

    /// Per-step bound on disposal (close handshake, task shutdown).
    pub close_timeout: Duration,

    /// Bound on the ready signal after the handshake.
    pub ready_timeout: Duration,

    /// Maximum inbound message size; `None` removes the cap.
    pub max_message_size: Option<usize>,

    /// Maximum inbound frame size; `None` removes the cap.
    pub max_frame_size: Option<usize>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionOptions {
    /// Creates options with flat addressing and no size caps.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flatten: true,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            max_message_size: None,
            max_frame_size: None,
        }
    }

    /// Creates options for nested session addressing.
    #[inline]
    #[must_use]
    pub const fn nested() -> Self {
        Self {
            flatten: false,
            ..Self::new()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Sets the session addressing mode.
    #[inline]
    #[must_use]
    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    /// Sets the disposal timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the ready timeout.
    #[inline]
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Caps inbound message size.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, size: Option<usize>) -> Self {
        self.max_message_size = size;
        self
    }

    /// Caps inbound frame size.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, size: Option<usize>) -> Self {
        self.max_frame_size = size;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
