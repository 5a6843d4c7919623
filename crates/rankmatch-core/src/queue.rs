// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-shard queue state: FIFOs keyed by rank, plus a sorted index of the
//! ranks that currently hold at least one ticket.
//!
//! `QueueState` is a pure value type. It is never shared; a single
//! `PartitionWorker` actor owns one instance exclusively and is the only
//! caller of its `&mut self` methods (see `rankmatch-worker`). Concurrency
//! safety therefore comes from actor isolation, not from locking inside this
//! type.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ticket::Ticket;

/// A queue could not be mutated because the head did not match the
/// caller's expectation — another decision path (immediate-match vs. tick,
/// or a concurrent RPC) already claimed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("head ticket does not match expected ticket")]
pub struct HeadMismatch;

/// Per-shard queue state.
#[derive(Debug, Clone)]
pub struct QueueState {
    /// Stable identifier for this shard (e.g. `p-01000-01999`).
    pub shard_id: String,
    /// Inclusive lower bound of ranks this shard accepts.
    pub range_start: i64,
    /// Inclusive upper bound of ranks this shard accepts.
    pub range_end: i64,
    /// Assignment epoch this state was created under.
    pub epoch: u64,
    queues_by_rank: BTreeMap<i64, VecDeque<Ticket>>,
    non_empty_ranks: BTreeSet<i64>,
    queued_count: usize,
}

impl QueueState {
    /// Create an empty queue state for the given shard range and epoch.
    #[must_use]
    pub fn new(shard_id: impl Into<String>, range_start: i64, range_end: i64, epoch: u64) -> Self {
        Self {
            shard_id: shard_id.into(),
            range_start,
            range_end,
            epoch,
            queues_by_rank: BTreeMap::new(),
            non_empty_ranks: BTreeSet::new(),
            queued_count: 0,
        }
    }

    /// Total number of queued tickets across all ranks.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queued_count
    }

    /// Ranks currently holding at least one ticket, in ascending order.
    pub fn non_empty_ranks(&self) -> impl DoubleEndedIterator<Item = i64> + '_ {
        self.non_empty_ranks.iter().copied()
    }

    /// Whether `rank` falls within `[range_start, range_end]`.
    #[must_use]
    pub fn in_range(&self, rank: i64) -> bool {
        rank >= self.range_start && rank <= self.range_end
    }

    /// Append `ticket` at the tail of its rank's FIFO.
    pub fn enqueue(&mut self, ticket: Ticket) {
        let rank = ticket.rank;
        self.rank_queue_mut(rank).push_back(ticket);
        self.queued_count += 1;
        self.non_empty_ranks.insert(rank);
    }

    /// Prepend `ticket` at the head of its rank's FIFO.
    ///
    /// Used only to roll back a ticket after a failed remote `reserve`; it
    /// preserves `enqueued_at_monotonic_ms` so age-based fairness survives
    /// the failed round-trip.
    pub fn enqueue_front(&mut self, ticket: Ticket) {
        let rank = ticket.rank;
        self.rank_queue_mut(rank).push_front(ticket);
        self.queued_count += 1;
        self.non_empty_ranks.insert(rank);
    }

    /// Pop the head ticket at `rank`, if any.
    pub fn dequeue_head(&mut self, rank: i64) -> Option<Ticket> {
        let Some(q) = self.queues_by_rank.get_mut(&rank) else {
            return None;
        };
        let popped = q.pop_front();
        if popped.is_some() {
            self.queued_count -= 1;
            if q.is_empty() {
                self.queues_by_rank.remove(&rank);
                self.non_empty_ranks.remove(&rank);
            }
        }
        popped
    }

    /// Read the head ticket at `rank` without mutating state.
    #[must_use]
    pub fn peek_head(&self, rank: i64) -> Option<&Ticket> {
        self.queues_by_rank.get(&rank).and_then(VecDeque::front)
    }

    /// Pop the head at `rank` only if it equals `expected` exactly.
    ///
    /// This is the sole concurrency primitive: it lets two independent
    /// decision paths (an immediate-match check on enqueue, and a periodic
    /// tick) race to claim the same head without ever double-matching it,
    /// because only one caller's compare-and-pop can observe the expected
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`HeadMismatch`] if the head is absent or differs from
    /// `expected`; the queue is left unchanged.
    pub fn dequeue_head_if_matches(
        &mut self,
        rank: i64,
        expected: &Ticket,
    ) -> Result<Ticket, HeadMismatch> {
        let matches = self.peek_head(rank) == Some(expected);
        if matches {
            self.dequeue_head(rank).ok_or(HeadMismatch)
        } else {
            Err(HeadMismatch)
        }
    }

    /// Peek the head at `rank`, skipping over `exclude_user_id` by looking
    /// one position deeper — never more than that, since a third candidate
    /// behind two same-user entries is not worth the scan cost.
    #[must_use]
    pub fn peek_head_skipping_user(&self, rank: i64, exclude_user_id: &str) -> Option<&Ticket> {
        let q = self.queues_by_rank.get(&rank)?;
        let mut iter = q.iter();
        let first = iter.next()?;
        if first.user_id != exclude_user_id {
            return Some(first);
        }
        iter.next().filter(|t| t.user_id != exclude_user_id)
    }

    fn rank_queue_mut(&mut self, rank: i64) -> &mut VecDeque<Ticket> {
        self.queues_by_rank.entry(rank).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(user: &str, rank: i64, ts: u64) -> Ticket {
        Ticket::new(user, rank, ts)
    }

    #[test]
    fn enqueue_dequeue_round_trip_preserves_fifo_order() {
        let mut q = QueueState::new("p-00000-00999", 0, 999, 1);
        q.enqueue(t("a", 500, 0));
        q.enqueue(t("b", 500, 10));
        assert_eq!(q.queued_count(), 2);
        assert_eq!(q.dequeue_head(500).unwrap().user_id, "a");
        assert_eq!(q.dequeue_head(500).unwrap().user_id, "b");
        assert_eq!(q.dequeue_head(500), None);
        assert_eq!(q.queued_count(), 0);
    }

    #[test]
    fn non_empty_ranks_tracks_insertion_and_removal() {
        let mut q = QueueState::new("shard", 0, 999, 1);
        q.enqueue(t("a", 100, 0));
        q.enqueue(t("b", 200, 0));
        assert_eq!(q.non_empty_ranks().collect::<Vec<_>>(), vec![100, 200]);
        q.dequeue_head(100);
        assert_eq!(q.non_empty_ranks().collect::<Vec<_>>(), vec![200]);
    }

    #[test]
    fn dequeue_head_if_matches_rejects_stale_expectation() {
        let mut q = QueueState::new("shard", 0, 999, 1);
        let ticket = t("a", 100, 0);
        q.enqueue(ticket.clone());
        let stale = t("a", 100, 1);
        assert!(q.dequeue_head_if_matches(100, &stale).is_err());
        assert_eq!(q.peek_head(100), Some(&ticket));
        assert!(q.dequeue_head_if_matches(100, &ticket).is_ok());
        assert_eq!(q.peek_head(100), None);
    }

    #[test]
    fn enqueue_front_preserves_age_on_rollback() {
        let mut q = QueueState::new("shard", 0, 999, 1);
        let old = t("a", 100, 5);
        q.enqueue(old.clone());
        let popped = q.dequeue_head(100).unwrap();
        q.enqueue_front(popped);
        assert_eq!(q.peek_head(100), Some(&old));
    }

    #[test]
    fn peek_head_skipping_user_only_looks_one_deeper() {
        let mut q = QueueState::new("shard", 0, 999, 1);
        q.enqueue(t("self", 100, 0));
        q.enqueue(t("self", 100, 1));
        q.enqueue(t("other", 100, 2));
        // Head is "self"; skipping only peeks the *second* element, which is
        // also "self" — so no candidate is returned even though a valid one
        // exists at position 3.
        assert_eq!(q.peek_head_skipping_user(100, "self"), None);
    }

    #[test]
    fn in_range_bounds_are_inclusive() {
        let q = QueueState::new("shard", 100, 200, 1);
        assert!(q.in_range(100));
        assert!(q.in_range(200));
        assert!(!q.in_range(99));
        assert!(!q.in_range(201));
    }
}
