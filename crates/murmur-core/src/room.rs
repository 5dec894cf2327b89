//! The shared chat room.
//!
//! There is exactly one room. Every connected client subscribes to it and
//! receives every event published after it subscribed. Nothing is replayed
//! to late subscribers.

use murmur_protocol::ChatEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default broadcast capacity.
const DEFAULT_ROOM_CAPACITY: usize = 1024;

/// Largest per-subscriber backlog a room will buffer.
pub const MAX_ROOM_CAPACITY: usize = 1 << 16;

/// Outbound sink for stamped events.
///
/// Publishing is fire-and-forget: it must not block on, or fail because of,
/// any individual subscriber.
pub trait Publisher: Send + Sync {
    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers the event was queued for.
    fn publish(&self, event: Arc<ChatEvent>) -> usize;
}

/// Broadcast room backed by a `tokio` broadcast channel.
///
/// A subscriber that falls more than `capacity` events behind loses the
/// oldest ones and sees `RecvError::Lagged`; the publisher never waits.
#[derive(Debug)]
pub struct Room {
    sender: broadcast::Sender<Arc<ChatEvent>>,
    capacity: usize,
}

impl Room {
    /// Create a room with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ROOM_CAPACITY)
    }

    /// Create a room with a specific capacity, clamped to
    /// `1..=MAX_ROOM_CAPACITY`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let clamped = capacity.clamp(1, MAX_ROOM_CAPACITY);
        if clamped != capacity {
            warn!(requested = capacity, capacity = clamped, "Room capacity out of range, clamped");
        }
        let capacity = clamped;
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChatEvent>> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the room capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for Room {
    fn publish(&self, event: Arc<ChatEvent>) -> usize {
        trace!(kind = %event.kind, username = %event.username, "Publishing event");
        // No subscribers is not a failure.
        self.sender.send(event).unwrap_or_default()
    }
}
