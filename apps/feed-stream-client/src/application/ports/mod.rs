//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ConnectionLink`: one physical duplex connection to the feed
//! - `AuthTokenProvider`: supplies the token used to open the link

use async_trait::async_trait;
use tokio::sync::mpsc;

// =============================================================================
// Connection Link
// =============================================================================

/// Event reported by a link after `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The transport is ready for `send`.
    Opened,
    /// The transport closed. No further events follow.
    Closed {
        /// Close code (1000 = normal, 1006 = abnormal).
        code: u16,
        /// Close reason.
        reason: String,
        /// Whether the close handshake completed.
        was_clean: bool,
    },
    /// A text frame arrived.
    Message(String),
    /// The transport failed. Usually followed by `Closed`.
    TransportError(String),
}

/// Receiver for the events of one `open` call.
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// Errors returned synchronously by a link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// `send` was called while the link was not open.
    #[error("link is not open")]
    NotOpen,

    /// The target could not be turned into a connection request.
    #[error("invalid target {target}: {message}")]
    InvalidTarget {
        /// Target as given.
        target: String,
        /// Error details.
        message: String,
    },

    /// The frame could not be handed to the transport.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// One physical transport connection.
///
/// A link only moves bytes: it performs no retry and knows nothing about
/// topics. Only the stream client calls its mutating operations.
///
/// `open` starts connecting and returns immediately with a channel on which
/// the outcome (`Opened`, or `TransportError`/`Closed`) and all later
/// traffic is reported. Calling `open` again abandons the previous
/// connection.
pub trait ConnectionLink: Send + 'static {
    /// Begin opening a connection to `target`.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::InvalidTarget` if no connection attempt could
    /// be started.
    fn open(&mut self, target: &str, auth_token: &str) -> Result<LinkEvents, LinkError>;

    /// Write one text frame.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::NotOpen` unless `Opened` has been reported and
    /// the link has not closed since.
    fn send(&mut self, frame: String) -> Result<(), LinkError>;

    /// Close the connection with a code and reason. No-op when not open.
    fn close(&mut self, code: u16, reason: &str);

    /// Check if the link is open.
    fn is_open(&self) -> bool;
}

// =============================================================================
// Auth
// =============================================================================

/// Errors from an auth token provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No token is currently available.
    #[error("no auth token available")]
    NoTokenAvailable,

    /// The provider failed.
    #[error("auth provider failed: {0}")]
    Provider(String),
}

/// Supplies the current auth token before each connection attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthTokenProvider: Send + Sync + 'static {
    /// Get the current token. An empty string means "no auth header".
    async fn auth_token(&self) -> Result<String, AuthError>;
}

/// Provider returning a fixed token.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Create a provider for a fixed token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl AuthTokenProvider for StaticToken {
    async fn auth_token(&self) -> Result<String, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError::NoTokenAvailable);
        }
        Ok(self.token.clone())
    }
}

/// Provider for feeds that need no authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthTokenProvider for NoAuth {
    async fn auth_token(&self) -> Result<String, AuthError> {
        Ok(String::new())
    }
}
