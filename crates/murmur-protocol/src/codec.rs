//! Codec for encoding and decoding Murmur events.
//!
//! Events are JSON objects carried one per WebSocket text frame, so no
//! additional framing is needed.

use thiserror::Error;

use crate::event::{ChatEvent, ErrorReply, InboundEvent};

/// Maximum inbound event size (64 KiB).
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload exceeds maximum size.
    #[error("Payload size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    TooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an outbound event.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ChatEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Encode an error reply.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_reply(reply: &ErrorReply) -> Result<String, CodecError> {
    Ok(serde_json::to_string(reply)?)
}

/// Decode an inbound event.
///
/// # Errors
///
/// Returns an error if the payload is too large, is not valid JSON, or
/// names an unknown event type.
pub fn decode(data: &[u8]) -> Result<InboundEvent, CodecError> {
    if data.len() > MAX_EVENT_SIZE {
        return Err(CodecError::TooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    #[test]
    fn test_decode_chat() {
        let event = decode(br#"{"username":"alice","message":"hi","type":"CHAT"}"#).unwrap();
        assert_eq!(event.username, "alice");
        assert_eq!(event.message, "hi");
        assert_eq!(event.kind, EventType::Chat);
        assert!(event.timestamp.is_none());
    }

    #[test]
    fn test_decode_keeps_client_timestamp_for_router_to_discard() {
        let event = decode(
            br#"{"username":"alice","message":"","type":"CHAT","timestamp":"1999-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(event.timestamp.as_deref(), Some("1999-01-01T00:00:00Z"));
    }

    #[test]
    fn test_decode_unknown_type() {
        match decode(br#"{"username":"alice","type":"SYSTEM"}"#) {
            Err(CodecError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode(b"not json"), Err(CodecError::Json(_))));
        assert!(matches!(decode(br#"{"username":"a"}"#), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_decode_too_large() {
        let data = vec![b' '; MAX_EVENT_SIZE + 1];
        match decode(&data) {
            Err(CodecError::TooLarge(n)) => assert_eq!(n, MAX_EVENT_SIZE + 1),
            other => panic!("Expected TooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_event_and_reply() {
        let text = encode(&ChatEvent::leave("bob", "2024-05-01T12:00:00.000Z")).unwrap();
        assert_eq!(
            text,
            r#"{"username":"bob","message":"bob left the chat","timestamp":"2024-05-01T12:00:00.000Z","type":"LEAVE"}"#
        );

        let reply = encode_reply(&ErrorReply::new(1003, "Not joined")).unwrap();
        assert_eq!(reply, r#"{"error":"Not joined","code":1003}"#);
    }
}
