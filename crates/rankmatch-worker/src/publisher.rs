// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port for the best-effort match-notification sink.
//!
//! `PartitionWorker` calls this on every finalized match; it never awaits
//! delivery and never treats a publish failure as a match failure — the
//! match already happened the moment both claims were released.

use rankmatch_core::Ticket;

/// Sink for finalized match pairs, keyed by each participant's `user_id`.
///
/// Implementations must not block the calling worker thread; fire into an
/// internal channel or similar and return immediately.
pub trait MatchPublisher: Send + Sync {
    /// Publish that `a` and `b` were matched. Order is unspecified — both
    /// participants receive the same payload.
    fn publish_match(&self, a: &Ticket, b: &Ticket);
}

/// A publisher that drops every match. Useful for tests that only care
/// about queue-state effects, not notification delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl MatchPublisher for NullPublisher {
    fn publish_match(&self, _a: &Ticket, _b: &Ticket) {}
}
