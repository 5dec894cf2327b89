//! Message router for Murmur.
//!
//! The router owns per-connection lifecycle state, keeps the
//! [`SessionRegistry`] in step with it, stamps every accepted event and hands
//! it to the [`Publisher`]. Stamping and publishing happen together under one
//! lock, so timestamps never go backwards in the broadcast stream.
//!
//! Each connection moves `Unjoined -> Joined -> Closed`:
//!
//! - `JOIN` binds the username and broadcasts `"<name> joined the chat"`.
//! - `CHAT` is rebroadcast as sent, apart from a fresh timestamp and
//!   `type = CHAT`.
//! - `LEAVE`, or the transport reporting a disconnect, unbinds and
//!   broadcasts `"<name> left the chat"`.
//!
//! Rejected events are returned as [`RouterError`] to the caller and never
//! reach other participants.

use crate::clock::{format_timestamp, Clock, SystemClock};
use crate::registry::{RegistryError, SessionRegistry};
use crate::room::Publisher;
use crate::session::{ConnectionId, SessionState};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use murmur_protocol::{
    codec, error_codes, ChatEvent, CodecError, ErrorReply, EventType, InboundEvent,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Event inconsistent with the connection's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// Chat sent before a successful join.
    #[error("chat before join")]
    NotJoined,

    /// Join with an empty or blank username.
    #[error("username must not be empty")]
    EmptyUsername,
}

/// Router errors.
///
/// All of these are local to the connection that caused them.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Join on a connection that already joined.
    #[error("Duplicate join: {0}")]
    DuplicateBind(ConnectionId),

    /// Lookup or unbind on a connection that never joined.
    #[error("Not joined: {0}")]
    NotBound(ConnectionId),

    /// Event type not allowed in the current state.
    #[error("Protocol error: {0}")]
    Protocol(ProtocolViolation),

    /// Payload could not be decoded.
    #[error("Invalid payload: {0}")]
    Codec(#[from] CodecError),
}

impl From<RegistryError> for RouterError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateBind(id) => RouterError::DuplicateBind(id),
            RegistryError::NotBound(id) => RouterError::NotBound(id),
        }
    }
}

impl RouterError {
    /// Error code reported to the originating client.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RouterError::DuplicateBind(_) => error_codes::DUPLICATE_JOIN,
            RouterError::NotBound(_) => error_codes::NOT_JOINED,
            RouterError::Protocol(ProtocolViolation::NotJoined) => error_codes::NOT_JOINED,
            RouterError::Protocol(_) => error_codes::PROTOCOL_VIOLATION,
            RouterError::Codec(CodecError::TooLarge(_)) => error_codes::PAYLOAD_TOO_LARGE,
            RouterError::Codec(_) => error_codes::INVALID_PAYLOAD,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::DuplicateBind(_) => "duplicate_bind",
            RouterError::NotBound(_) => "not_bound",
            RouterError::Protocol(_) => "protocol",
            RouterError::Codec(_) => "codec",
        }
    }

    /// Reply for the originating connection.
    #[must_use]
    pub fn to_reply(&self) -> ErrorReply {
        ErrorReply::new(self.code(), self.to_string())
    }
}

/// The central message router.
pub struct MessageRouter {
    /// Bound usernames.
    registry: SessionRegistry,
    /// Lifecycle state of every live connection.
    connections: DashMap<ConnectionId, SessionState>,
    /// Broadcast sink.
    publisher: Arc<dyn Publisher>,
    /// Timestamp source.
    clock: Arc<dyn Clock>,
    /// Events handed to the publisher since start.
    published: AtomicU64,
    /// Serializes stamp-then-publish across connections.
    publish_order: Mutex<()>,
}

impl MessageRouter {
    /// Create a router stamping events with the system clock.
    #[must_use]
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self::with_clock(publisher, Arc::new(SystemClock::new()))
    }

    /// Create a router with a custom clock.
    #[must_use]
    pub fn with_clock(publisher: Arc<dyn Publisher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            connections: DashMap::new(),
            publisher,
            clock,
            published: AtomicU64::new(0),
            publish_order: Mutex::new(()),
        }
    }

    /// Register a newly accepted connection.
    pub fn on_connect(&self, connection_id: &ConnectionId) {
        match self.connections.entry(connection_id.clone()) {
            Entry::Occupied(_) => {
                warn!(connection = %connection_id, "Connect for a live connection ignored");
            }
            Entry::Vacant(slot) => {
                slot.insert(SessionState::Unjoined);
                debug!(connection = %connection_id, "Connection registered");
            }
        }
    }

    /// Decode a raw payload and process it.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Codec`] if the payload cannot be decoded, or
    /// any error [`MessageRouter::on_message`] returns.
    pub fn on_raw(
        &self,
        connection_id: &ConnectionId,
        data: &[u8],
    ) -> Result<Option<Arc<ChatEvent>>, RouterError> {
        let event = codec::decode(data)?;
        self.on_message(connection_id, event)
    }

    /// Process one inbound event.
    ///
    /// Returns the broadcast event, or `None` if nothing was broadcast.
    ///
    /// # Errors
    ///
    /// - [`RouterError::DuplicateBind`] for a second join.
    /// - [`RouterError::Protocol`] for a chat before join or a blank username.
    /// - [`RouterError::NotBound`] if state and registry disagree.
    pub fn on_message(
        &self,
        connection_id: &ConnectionId,
        event: InboundEvent,
    ) -> Result<Option<Arc<ChatEvent>>, RouterError> {
        // Held for the whole transition so one connection's events never interleave.
        let Some(mut state) = self.connections.get_mut(connection_id) else {
            debug!(connection = %connection_id, kind = %event.kind, "Dropping event for unknown connection");
            return Ok(None);
        };

        if !state.is_open() {
            debug!(connection = %connection_id, kind = %event.kind, "Dropping late event for closed connection");
            return Ok(None);
        }

        match event.kind {
            EventType::Join => self
                .join(connection_id, &mut state, &event.username)
                .map(Some),
            EventType::Chat => self.chat(connection_id, &state, event).map(Some),
            EventType::Leave => self.leave(connection_id, &mut state),
        }
    }

    /// Handle the transport reporting that a connection is gone.
    ///
    /// Broadcasts a `LEAVE` if the connection had joined, then forgets it.
    /// Disconnecting an unjoined, closed or unknown connection broadcasts
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotBound`] if state and registry disagree.
    pub fn on_disconnect(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<Arc<ChatEvent>>, RouterError> {
        let Some((_, mut state)) = self.connections.remove(connection_id) else {
            debug!(connection = %connection_id, "Disconnect for unknown connection");
            return Ok(None);
        };

        debug!(connection = %connection_id, state = ?state, "Connection closed");
        self.leave(connection_id, &mut state)
    }

    /// Lifecycle state of a connection, if it is still known.
    #[must_use]
    pub fn state(&self, connection_id: &ConnectionId) -> Option<SessionState> {
        self.connections.get(connection_id).map(|s| *s)
    }

    /// Usernames of everyone currently in the room.
    #[must_use]
    pub fn participants(&self) -> Vec<String> {
        self.registry.participants()
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            connections: self.connections.len(),
            participants: self.registry.len(),
            events_published: self.published.load(Ordering::Relaxed),
        }
    }

    fn join(
        &self,
        connection_id: &ConnectionId,
        state: &mut SessionState,
        username: &str,
    ) -> Result<Arc<ChatEvent>, RouterError> {
        if username.trim().is_empty() {
            return Err(RouterError::Protocol(ProtocolViolation::EmptyUsername));
        }

        self.registry.bind(connection_id, username)?;
        *state = SessionState::Joined;

        info!(connection = %connection_id, username = %username, "Participant joined");
        Ok(self.emit(|timestamp| ChatEvent::join(username, timestamp)))
    }

    fn chat(
        &self,
        connection_id: &ConnectionId,
        state: &SessionState,
        event: InboundEvent,
    ) -> Result<Arc<ChatEvent>, RouterError> {
        if *state != SessionState::Joined {
            return Err(RouterError::Protocol(ProtocolViolation::NotJoined));
        }

        let bound = self.registry.lookup(connection_id)?;
        if event.username != bound {
            warn!(
                connection = %connection_id,
                claimed = %event.username,
                username = %bound,
                "Chat username does not match session"
            );
        }

        let InboundEvent {
            username, message, ..
        } = event;
        Ok(self.emit(|timestamp| ChatEvent::chat(username, message, timestamp)))
    }

    fn leave(
        &self,
        connection_id: &ConnectionId,
        state: &mut SessionState,
    ) -> Result<Option<Arc<ChatEvent>>, RouterError> {
        match *state {
            SessionState::Unjoined => {
                debug!(connection = %connection_id, "Leave before join, nothing to announce");
                Ok(None)
            }
            SessionState::Closed => {
                debug!(connection = %connection_id, "Duplicate leave ignored");
                Ok(None)
            }
            SessionState::Joined => {
                *state = SessionState::Closed;
                let username = self.registry.unbind(connection_id)?;

                info!(connection = %connection_id, username = %username, "Participant left");
                Ok(Some(
                    self.emit(|timestamp| ChatEvent::leave(username, timestamp)),
                ))
            }
        }
    }

    fn stamp(&self) -> String {
        format_timestamp(self.clock.now())
    }

    fn emit(&self, build: impl FnOnce(String) -> ChatEvent) -> Arc<ChatEvent> {
        let (event, recipients) = {
            let _order = self
                .publish_order
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let event = Arc::new(build(self.stamp()));
            let recipients = self.publisher.publish(Arc::clone(&event));
            (event, recipients)
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        debug!(kind = %event.kind, username = %event.username, recipients, "Broadcast");
        event
    }
}

/// Router statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    /// Live connections, joined or not.
    pub connections: usize,
    /// Connections with a bound username.
    pub participants: usize,
    /// Events broadcast since start.
    pub events_published: u64,
}
