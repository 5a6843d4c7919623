// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Monotonic clock shared by every worker in a process.
//!
//! Ages, widening, and tie-breaking are all defined over `tokio::time`'s
//! paused-clock-aware [`tokio::time::Instant`], never `std::time::Instant`
//! or the wall clock — this is what lets tests drive tick timing with
//! `tokio::time::pause`/`advance` instead of real sleeps.

use tokio::time::Instant;

/// A shared zero point for `enqueued_at_monotonic_ms` timestamps.
///
/// One `Clock` is created per process (or per test) and cloned into every
/// worker, so ages are comparable across shards.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Start a new clock with its zero point at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since this clock's zero point.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
