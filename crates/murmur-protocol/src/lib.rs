//! # murmur-protocol
//!
//! Wire format for the Murmur chat relay.
//!
//! Every event travels as a single JSON text frame. Clients send an
//! [`InboundEvent`]; the relay broadcasts stamped [`ChatEvent`]s to the shared
//! room and answers rejected events with an [`ErrorReply`] to the sender only.
//!
//! ## Event Types
//!
//! - `JOIN` - Announce a username for this connection
//! - `CHAT` - A text message for everyone in the room
//! - `LEAVE` - Leave the room without closing the socket
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, ChatEvent};
//!
//! let event = ChatEvent::join("alice", "2024-05-01T12:00:00.000Z");
//! let text = codec::encode(&event).unwrap();
//! assert!(text.contains("\"type\":\"JOIN\""));
//! ```

pub mod codec;
pub mod event;

pub use codec::{decode, encode, encode_reply, CodecError};
pub use event::{error_codes, ChatEvent, ErrorReply, EventType, InboundEvent};
