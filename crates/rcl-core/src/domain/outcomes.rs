//! Non-error outcomes of waits and takes.

use crate::domain::handles::{EntityId, EntityKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of a successful take call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum TakeStatus {
    /// One item was written into the caller's buffer.
    Taken,
    /// Nothing to drain (consumed elsewhere, or a spurious wake).
    NoDataAvailable,
}

impl TakeStatus {
    #[must_use]
    pub fn is_taken(self) -> bool {
        self == Self::Taken
    }
}

/// Bound on a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Check readiness once and return.
    Poll,
    /// Block at most this long.
    After(Duration),
    /// Block until ready or interrupted.
    Infinite,
}

impl WaitTimeout {
    /// Interpret a signed nanosecond count: negative waits forever, zero polls.
    #[must_use]
    pub fn from_nanos(nanos: i64) -> Self {
        match nanos {
            n if n < 0 => Self::Infinite,
            0 => Self::Poll,
            n => Self::After(Duration::from_nanos(n as u64)),
        }
    }
}

impl From<Duration> for WaitTimeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Poll
        } else {
            Self::After(duration)
        }
    }
}

/// One slot a wait reported ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEntity {
    /// Kind partition of the slot.
    pub kind: EntityKind,
    /// Slot index within that kind.
    pub slot: usize,
    /// Entity registered in the slot.
    pub id: EntityId,
}

/// Outcome of [`WaitSet::wait`](crate::domain::WaitSet::wait).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// At least one entity is ready; listed in kind-then-slot order.
    Ready(Vec<ReadyEntity>),
    /// The deadline passed with nothing ready.
    Timeout,
    /// The shutdown token fired.
    Interrupted,
}

impl WaitOutcome {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Ready entries, empty unless `Ready`.
    #[must_use]
    pub fn ready(&self) -> &[ReadyEntity] {
        match self {
            Self::Ready(entries) => entries,
            _ => &[],
        }
    }
}

/// Matched-peer status reported by an event source.
///
/// The `*_change` fields count changes since the previous take and are reset
/// by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchedStatus {
    /// Peers ever matched on the topic.
    pub total_count: u64,
    pub total_count_change: u64,
    /// Peers currently matched.
    pub current_count: u64,
    pub current_count_change: i64,
}

impl MatchedStatus {
    /// Whether a change is waiting to be taken.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.total_count_change != 0 || self.current_count_change != 0
    }

    pub(crate) fn peer_matched(&mut self) {
        self.total_count += 1;
        self.total_count_change += 1;
        self.current_count += 1;
        self.current_count_change += 1;
    }

    pub(crate) fn peer_unmatched(&mut self) {
        self.current_count = self.current_count.saturating_sub(1);
        self.current_count_change -= 1;
    }

    pub(crate) fn reset_changes(&mut self) {
        self.total_count_change = 0;
        self.current_count_change = 0;
    }
}
