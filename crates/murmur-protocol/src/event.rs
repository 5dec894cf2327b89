//! Event types for the Murmur protocol.
//!
//! A [`ChatEvent`] is the unit broadcast to every participant. Its `type`
//! is drawn from a closed set and its `timestamp` is always assigned by the
//! relay, never by the client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// A chat message.
    Chat,
    /// A participant joined the room.
    Join,
    /// A participant left the room.
    Leave,
}

impl EventType {
    /// Wire name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Chat => "CHAT",
            EventType::Join => "JOIN",
            EventType::Leave => "LEAVE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stamped, classified event as broadcast to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Display name of the sender.
    pub username: String,
    /// Message body. Announcement text for `JOIN`/`LEAVE`.
    pub message: String,
    /// Instant the relay accepted the event.
    pub timestamp: String,
    /// Event classification.
    #[serde(rename = "type")]
    pub kind: EventType,
}

impl ChatEvent {
    /// Create a `JOIN` announcement.
    #[must_use]
    pub fn join(username: impl Into<String>, timestamp: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            message: format!("{username} joined the chat"),
            username,
            timestamp: timestamp.into(),
            kind: EventType::Join,
        }
    }

    /// Create a `LEAVE` announcement.
    #[must_use]
    pub fn leave(username: impl Into<String>, timestamp: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            message: format!("{username} left the chat"),
            username,
            timestamp: timestamp.into(),
            kind: EventType::Leave,
        }
    }

    /// Create a `CHAT` event. The body is carried verbatim.
    #[must_use]
    pub fn chat(
        username: impl Into<String>,
        message: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
            timestamp: timestamp.into(),
            kind: EventType::Chat,
        }
    }
}

/// An event as sent by a client.
///
/// A `timestamp` supplied by the client is accepted here so that such
/// payloads still decode, and is discarded by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Claimed display name.
    #[serde(default)]
    pub username: String,
    /// Message body.
    #[serde(default)]
    pub message: String,
    /// Requested event type.
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl InboundEvent {
    /// A join request for `username`.
    #[must_use]
    pub fn join(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: String::new(),
            kind: EventType::Join,
            timestamp: None,
        }
    }

    /// A chat message from `username`.
    #[must_use]
    pub fn chat(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
            kind: EventType::Chat,
            timestamp: None,
        }
    }

    /// An explicit leave request.
    #[must_use]
    pub fn leave(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: String::new(),
            kind: EventType::Leave,
            timestamp: None,
        }
    }
}

/// Error codes carried by [`ErrorReply`].
pub mod error_codes {
    pub const INVALID_PAYLOAD: u16 = 1001;
    pub const DUPLICATE_JOIN: u16 = 1002;
    pub const NOT_JOINED: u16 = 1003;
    pub const PROTOCOL_VIOLATION: u16 = 1004;
    pub const PAYLOAD_TOO_LARGE: u16 = 1005;
}

/// Rejection notice sent only to the connection whose event was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Human-readable reason.
    pub error: String,
    /// One of [`error_codes`].
    pub code: u16,
}

impl ErrorReply {
    /// Create a new error reply.
    #[must_use]
    pub fn new(code: u16, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}
