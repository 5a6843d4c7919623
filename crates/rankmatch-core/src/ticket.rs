// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The immutable unit of work queued by a [`crate::queue::QueueState`].

use serde::{Deserialize, Serialize};

/// A single matchmaking request accepted into a shard's queue.
///
/// `enqueued_at_monotonic_ms` is stamped when the owning
/// [`crate::queue::QueueState`]'s worker accepts the request — never the
/// client's send time — and is the sole basis for widening and for the
/// age tie-break in [`crate::search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Stable identity of the requesting user.
    pub user_id: String,
    /// Rank the user was queued at.
    pub rank: i64,
    /// Monotonic acceptance timestamp, in milliseconds.
    pub enqueued_at_monotonic_ms: u64,
}

impl Ticket {
    /// Construct a ticket stamped with `now_ms`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, rank: i64, now_ms: u64) -> Self {
        Self {
            user_id: user_id.into(),
            rank,
            enqueued_at_monotonic_ms: now_ms,
        }
    }

    /// Age of this ticket relative to `now_ms`, saturating at zero.
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.enqueued_at_monotonic_ms)
    }
}
