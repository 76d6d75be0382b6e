//! Builder pattern for connection configuration.
//!
//! Provides a fluent API for configuring and opening a [`Connection`].
//!
//! # Example
//!
//! ```no_run
//! use cdp_mux::Connection;
//!
//! # async fn example() -> cdp_mux::Result<()> {
//! let connection = Connection::builder()
//!     .url("ws://127.0.0.1:9222/devtools/browser/5f1c")
//!     .on_close(|| println!("debuggee went away"))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

use super::handle::{CloseCallback, Connection};
use super::options::ConnectionOptions;

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`Connection`].
///
/// Use [`Connection::builder()`] to create a new builder.
#[derive(Default)]
pub struct ConnectionBuilder {
    /// WebSocket debugger URL.
    url: Option<String>,
    /// Behaviour options.
    options: ConnectionOptions,
    /// Invoked once when the connection is disposed.
    on_close: Option<CloseCallback>,
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("url", &self.url)
            .field("options", &self.options)
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

// ============================================================================
// ConnectionBuilder Implementation
// ============================================================================

impl ConnectionBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the WebSocket debugger URL (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the session addressing mode.
    #[inline]
    #[must_use]
    pub fn flatten(mut self, flatten: bool) -> Self {
        self.options.flatten = flatten;
        self
    }

    /// Uses nested session addressing.
    #[inline]
    #[must_use]
    pub fn nested(self) -> Self {
        self.flatten(false)
    }

    /// Sets the disposal timeout.
    #[inline]
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.options.close_timeout = timeout;
        self
    }

    /// Sets the ready timeout.
    #[inline]
    #[must_use]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.options.ready_timeout = timeout;
        self
    }

    /// Registers a callback run once when the connection is disposed.
    #[inline]
    #[must_use]
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_close = Some(Box::new(callback));
        self
    }

    /// Validates the configuration and opens the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL is missing, malformed, or not `ws`/`wss`
    /// - [`Error::WebSocket`] if the handshake fails
    /// - [`Error::ConnectionTimeout`] if the receive loop does not start in time
    pub async fn connect(self) -> Result<Connection> {
        let url = self.validate_url()?;
        Connection::open(url, self.options, self.on_close).await
    }

    fn validate_url(&self) -> Result<String> {
        let raw = self
            .url
            .as_deref()
            .ok_or_else(|| Error::config("WebSocket URL is required"))?;

        let parsed =
            Url::parse(raw).map_err(|e| Error::config(format!("Invalid WebSocket URL {raw}: {e}")))?;

        match parsed.scheme() {
            "ws" | "wss" => Ok(parsed.into()),
            scheme => Err(Error::config(format!(
                "Unsupported URL scheme `{scheme}`, expected ws or wss"
            ))),
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
    fn test_builder_sets_options() {
        let builder = ConnectionBuilder::new()
            .url("ws://127.0.0.1:9222/devtools/browser/abc")
            .nested()
            .close_timeout(Duration::from_secs(2));

        assert!(!builder.options.flatten);
        assert_eq!(builder.options.close_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_validate_accepts_ws() {
        let url = ConnectionBuilder::new()
            .url("ws://127.0.0.1:9222/devtools/page/ABC")
            .validate_url()
            .expect("valid");
        assert_eq!(url, "ws://127.0.0.1:9222/devtools/page/ABC");
    }

    #[test]
    fn test_validate_rejects_missing_url() {
        let err = ConnectionBuilder::new().validate_url().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_http_scheme() {
        let err = ConnectionBuilder::new()
            .url("http://127.0.0.1:9222/json/version")
            .validate_url()
            .unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[tokio::test]
    async fn test_connect_fails_fast_on_bad_url() {
        let err = ConnectionBuilder::new().url("not a url").connect().await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
