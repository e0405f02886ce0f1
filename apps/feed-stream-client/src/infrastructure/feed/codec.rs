//! Feed Codec
//!
//! JSON encoding of outbound commands and decoding of the inbound envelope.
//!
//! Outbound:
//! ```json
//! {"type":"subscribe","channel":"portfolio:user-1","requestId":"8c0f..."}
//! ```
//!
//! Inbound frames must be JSON objects whose `type` is one of `data`,
//! `heartbeat`, `error`, `subscription_confirmed` or `pong`.

use serde::Serialize;

use crate::domain::outbound::{CommandKind, OutboundCommand};
use crate::domain::streaming::InboundMessage;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed (includes unknown `type` values).
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireCommand<'a> {
    #[serde(rename = "type")]
    kind: CommandKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    request_id: &'a str,
}

/// JSON codec for the feed protocol.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode an outbound command to a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, command: &OutboundCommand) -> Result<String, CodecError> {
        let wire = WireCommand {
            kind: command.kind,
            channel: command.topic.as_deref(),
            request_id: &command.request_id,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decode a text frame into an inbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object, has a missing or
    /// unknown `type`, or lacks a field its type requires.
    pub fn decode(&self, text: &str) -> Result<InboundMessage, CodecError> {
        let trimmed = text.trim();

        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(trimmed)
            )));
        }

        Ok(serde_json::from_str(trimmed)?)
    }
}

fn preview(text: &str) -> String {
    let cut: String = text.chars().take(50).collect();
    if cut.len() < text.len() {
        format!("{cut}...")
    } else {
        cut
    }
}
