//! # Pending Requests
//!
//! Caller-side table matching responses to the requests that produced them.
//!
//! Flow:
//! 1. `Client::send_request` returns the sequence number of the request
//! 2. Caller calls `register(sequence, method, continuation)`
//! 3. A wait reports the client ready; caller drains `take_response(header, ..)`
//! 4. `complete(&header)` hands back the continuation, or `Stale` when the
//!    sequence number is unknown (already completed, cancelled or expired)
//!
//! Sequence numbers are unique per client only: use one table per client.

use crate::domain::{RclError, RclResult, RequestHeader};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct PendingRequest<T> {
    continuation: T,
    created_at: Instant,
    method: String,
    timeout: Duration,
}

/// Counters for a pending request table.
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    /// Responses whose sequence number was not pending
    pub total_stale: AtomicU64,
    pub total_timeouts: AtomicU64,
    pub total_cancelled: AtomicU64,
}

/// Outcome of matching a response header.
#[derive(Debug, PartialEq, Eq)]
pub enum Correlated<T> {
    /// The continuation registered for the header's sequence number.
    Matched(T),
    /// No request with this sequence number is pending.
    Stale,
}

/// Sequence number → continuation table.
pub struct PendingRequests<T> {
    pending: HashMap<i64, PendingRequest<T>>,
    default_timeout: Duration,
    stats: Arc<PendingStats>,
}

impl<T> PendingRequests<T> {
    /// Create a table whose entries expire after `default_timeout`.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            default_timeout,
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Register a continuation for `sequence_number`.
    ///
    /// # Errors
    /// - `InvalidArgument`: the sequence number is already pending
    pub fn register(
        &mut self,
        sequence_number: i64,
        method: &str,
        continuation: T,
    ) -> RclResult<()> {
        self.register_with_timeout(sequence_number, method, continuation, self.default_timeout)
    }

    pub fn register_with_timeout(
        &mut self,
        sequence_number: i64,
        method: &str,
        continuation: T,
        timeout: Duration,
    ) -> RclResult<()> {
        if self.pending.contains_key(&sequence_number) {
            return Err(RclError::InvalidArgument(format!(
                "sequence number {} is already pending",
                sequence_number
            )));
        }

        self.pending.insert(
            sequence_number,
            PendingRequest {
                continuation,
                created_at: Instant::now(),
                method: method.to_string(),
                timeout,
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(sequence = sequence_number, method, "Registered pending request");
        Ok(())
    }

    /// Remove and return the continuation matching `header`.
    pub fn complete(&mut self, header: &RequestHeader) -> Correlated<T> {
        let sequence_number = header.sequence_number();
        match self.pending.remove(&sequence_number) {
            Some(pending) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    sequence = sequence_number,
                    method = %pending.method,
                    response_time_ms = pending.created_at.elapsed().as_millis() as u64,
                    "Completed pending request"
                );
                Correlated::Matched(pending.continuation)
            }
            None => {
                self.stats.total_stale.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sequence = sequence_number,
                    populated = header.is_populated(),
                    "Response for unknown or expired sequence number"
                );
                Correlated::Stale
            }
        }
    }

    /// Remove entries older than their timeout as of `now`.
    ///
    /// Returns the removed continuations so callers can fail them.
    pub fn remove_expired(&mut self, now: Instant) -> Vec<(i64, T)> {
        let expired: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, request)| now.saturating_duration_since(request.created_at) > request.timeout)
            .map(|(sequence, _)| *sequence)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for sequence in expired {
            if let Some(request) = self.pending.remove(&sequence) {
                warn!(
                    sequence,
                    method = %request.method,
                    timeout_ms = request.timeout.as_millis() as u64,
                    "Removing expired pending request"
                );
                self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                removed.push((sequence, request.continuation));
            }
        }
        removed
    }

    /// Drop a pending request. Returns whether it was pending.
    pub fn cancel(&mut self, sequence_number: i64) -> bool {
        if self.pending.remove(&sequence_number).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self, sequence_number: i64) -> bool {
        self.pending.contains_key(&sequence_number)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}
