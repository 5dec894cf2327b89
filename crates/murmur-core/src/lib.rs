//! # murmur-core
//!
//! Session tracking and broadcast routing for the Murmur chat relay.
//!
//! This crate provides the stateful part of the relay:
//!
//! - **Session** - Connection identity and per-connection lifecycle state
//! - **Registry** - Authoritative `connection -> username` mapping
//! - **Room** - The single shared broadcast channel
//! - **Router** - Classifies, stamps and broadcasts inbound events
//! - **Clock** - Server-side timestamps
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Router    │────▶│    Room     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Registry   │
//!                     └─────────────┘
//! ```

pub mod clock;
pub mod registry;
pub mod room;
pub mod router;
pub mod session;

pub use clock::{format_timestamp, Clock, SystemClock};
pub use registry::{RegistryError, SessionRegistry};
pub use room::{Publisher, Room, MAX_ROOM_CAPACITY};
pub use router::{MessageRouter, ProtocolViolation, RouterError, RouterStats};
pub use session::{ConnectionId, SessionState};
