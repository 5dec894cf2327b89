//! Server-side timestamps.
//!
//! Every emitted event is stamped with the instant the router accepted it,
//! formatted as RFC 3339 in UTC with millisecond precision, e.g.
//! `2024-05-01T12:00:00.123Z`. Because the format is fixed-width, stamps
//! from one relay compare correctly as plain strings.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of acceptance instants.
pub trait Clock: Send + Sync {
    /// The current instant. Successive calls never go backwards.
    fn now(&self) -> DateTime<Utc>;
}

/// Millisecond-resolution wall clock that never goes backwards.
///
/// If the system clock steps back, the last issued instant is repeated until
/// wall time catches up.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_millis: AtomicI64,
}

impl SystemClock {
    /// Create a new system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now();
        let millis = wall.timestamp_millis();
        let previous = self.last_millis.fetch_max(millis, Ordering::SeqCst);

        Utc.timestamp_millis_opt(previous.max(millis))
            .single()
            .unwrap_or(wall)
    }
}

/// Format an instant the way it appears on the wire.
#[must_use]
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}
