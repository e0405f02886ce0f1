//! Streaming Types
//!
//! Core types shared by every component of the client: the connection
//! state machine's states, the topic/payload vocabulary and the inbound
//! message envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque, case-sensitive feed channel name (e.g. `portfolio:user-1`).
pub type Topic = String;

/// Payload delivered to topic listeners.
pub type Payload = serde_json::Value;

/// Connection state of a stream client.
///
/// Exactly one value is current per client; every transition is published
/// to state-change observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Idle. No link, no timers.
    #[default]
    Disconnected,
    /// Waiting for the transport to report `opened`.
    Connecting,
    /// Link open, heartbeat running, commands flow directly.
    Connected,
    /// Waiting for the back-off delay before the next attempt.
    Reconnecting,
    /// Attempt ceiling reached. Terminal until `reconnect()`.
    Failed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Check if commands can be written to the link.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the client is working towards a connection.
    #[must_use]
    pub const fn is_transitional(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound message envelope, narrowed at the boundary.
///
/// Any other `type` value is rejected by the codec.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Payload for a topic.
    Data {
        /// Topic the payload belongs to.
        channel: Topic,
        /// Payload (null when absent).
        #[serde(default)]
        data: Payload,
    },
    /// Server heartbeat.
    Heartbeat,
    /// Server-reported error.
    Error {
        /// Channel the error refers to.
        #[serde(default)]
        channel: Option<Topic>,
        /// Error text.
        #[serde(default)]
        error: Option<String>,
    },
    /// Acknowledgement of a subscribe command.
    SubscriptionConfirmed {
        /// Confirmed channel.
        #[serde(default)]
        channel: Option<Topic>,
    },
    /// Reply to a ping.
    Pong,
}

impl InboundMessage {
    /// Get the wire type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data",
            Self::Heartbeat => "heartbeat",
            Self::Error { .. } => "error",
            Self::SubscriptionConfirmed { .. } => "subscription_confirmed",
            Self::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Connected.as_str(), "connected");
        assert_eq!(ConnectionState::Reconnecting.as_str(), "reconnecting");
        assert_eq!(ConnectionState::Failed.as_str(), "failed");
    }

    #[test]
    fn state_checks() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Connecting.is_transitional());
        assert!(ConnectionState::Reconnecting.is_transitional());
        assert!(!ConnectionState::Failed.is_transitional());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn inbound_type_names() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"subscription_confirmed","channel":"orders"}"#)
                .unwrap();
        assert_eq!(msg.type_name(), "subscription_confirmed");
        assert_eq!(InboundMessage::Pong.type_name(), "pong");
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
    }
}
