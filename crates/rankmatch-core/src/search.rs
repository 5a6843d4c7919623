// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Closest-opponent search over a single [`QueueState`], with the strict
//! tie-breaking order and scan bound required by the matching contract.

use crate::queue::QueueState;
use crate::ticket::Ticket;

/// A candidate opponent found by [`peek_best_opponent`], tagged with the
/// rank its head was peeked at (needed by callers that must re-peek or
/// remove it afterward).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The opponent ticket itself.
    pub ticket: Ticket,
}

/// The ordering key `(|rank - requester_rank|, enqueued_at, rank, user_id)`
/// for `opponent` relative to `requester_rank`, ascending in every field.
///
/// Exposed (not just used internally by [`is_better`]) because tick
/// processing must compare candidates drawn from *different* requesters —
/// each evaluated against its own requester's rank — to pick one globally
/// best pair across the whole shard in one tick.
#[must_use]
pub fn sort_key(requester_rank: i64, opponent: &Ticket) -> (u64, u64, i64, &str) {
    let diff = (opponent.rank - requester_rank).unsigned_abs();
    (
        diff,
        opponent.enqueued_at_monotonic_ms,
        opponent.rank,
        opponent.user_id.as_str(),
    )
}

/// Strict total order over two candidates for the *same* `requester_rank`.
/// Returns `true` iff `a` is strictly better than `b`.
#[must_use]
pub fn is_better(requester_rank: i64, a: &Ticket, b: &Ticket) -> bool {
    sort_key(requester_rank, a) < sort_key(requester_rank, b)
}

/// Find the best opponent for a requester at `requester_rank`, considering
/// only ranks within `allowed_diff` and excluding `exclude_user_id`, without
/// mutating `state`.
///
/// Starts at the insertion point for `requester_rank` and alternates
/// outward (ties broken toward the lower rank, matching [`is_better`]'s
/// rank tie-break), stopping a side once it exceeds `allowed_diff` or runs
/// out of ranks, and stopping entirely once both sides are exhausted or
/// `max_scan_ranks` distinct ranks have been inspected.
///
/// If `requester_rank` itself holds a non-excluded head, that is an exact
/// match (distance 0) and is returned immediately — it can never be beaten.
#[must_use]
pub fn peek_best_opponent(
    state: &QueueState,
    requester_rank: i64,
    allowed_diff: u64,
    exclude_user_id: &str,
    max_scan_ranks: usize,
) -> Option<Candidate> {
    if let Some(same_rank) = state.peek_head_skipping_user(requester_rank, exclude_user_id) {
        return Some(Candidate {
            ticket: same_rank.clone(),
        });
    }

    let mut left = lower_neighbor(state, requester_rank);
    let mut right = upper_neighbor(state, requester_rank);
    let mut best: Option<Ticket> = None;
    let mut scanned = 0usize;

    while scanned < max_scan_ranks && (left.is_some() || right.is_some()) {
        let left_diff = left.map(|r| (requester_rank - r).unsigned_abs());
        let right_diff = right.map(|r| (r - requester_rank).unsigned_abs());

        let take_left = match (left_diff, right_diff) {
            (Some(l), Some(r)) => l <= r,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        let (rank, diff) = if take_left {
            let r = left.expect("left branch selected implies left is Some");
            let d = left_diff.expect("left branch selected implies left_diff is Some");
            if d > allowed_diff {
                left = None; // distances only grow moving further left; stop this side
            } else {
                left = lower_neighbor(state, r);
            }
            (r, d)
        } else {
            let r = right.expect("right branch selected implies right is Some");
            let d = right_diff.expect("right branch selected implies right_diff is Some");
            if d > allowed_diff {
                right = None; // distances only grow moving further right; stop this side
            } else {
                right = upper_neighbor(state, r);
            }
            (r, d)
        };

        if diff > allowed_diff {
            continue;
        }

        scanned += 1;
        if let Some(candidate) = state.peek_head_skipping_user(rank, exclude_user_id) {
            let better = match &best {
                None => true,
                Some(current) => is_better(requester_rank, candidate, current),
            };
            if better {
                best = Some(candidate.clone());
            }
        }
    }

    best.map(|ticket| Candidate { ticket })
}

/// Remove the exact opponent a prior [`peek_best_opponent`] call returned.
///
/// This is exactly [`QueueState::dequeue_head_if_matches`] on the
/// opponent's rank; kept as a named wrapper so call sites read as the
/// domain operation ("take the opponent I already picked"), not a raw
/// queue primitive.
///
/// # Errors
///
/// Returns [`crate::queue::HeadMismatch`] if another path already claimed
/// the head at that rank.
pub fn take_best_opponent(
    state: &mut QueueState,
    opponent: &Ticket,
) -> Result<Ticket, crate::queue::HeadMismatch> {
    state.dequeue_head_if_matches(opponent.rank, opponent)
}

fn lower_neighbor(state: &QueueState, rank: i64) -> Option<i64> {
    state.non_empty_ranks().rev().find(|&r| r < rank)
}

fn upper_neighbor(state: &QueueState, rank: i64) -> Option<i64> {
    state.non_empty_ranks().find(|&r| r > rank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::Ticket;

    fn t(user: &str, rank: i64, ts: u64) -> Ticket {
        Ticket::new(user, rank, ts)
    }

    #[test]
    fn exact_rank_match_wins_immediately() {
        let mut q = QueueState::new("shard", 0, 2000, 1);
        q.enqueue(t("a", 1500, 0));
        q.enqueue(t("b", 1400, 5));
        let best = peek_best_opponent(&q, 1500, 100, "requester", 10).unwrap();
        assert_eq!(best.ticket.user_id, "a");
    }

    #[test]
    fn out_of_tolerance_ranks_are_excluded() {
        let mut q = QueueState::new("shard", 0, 2000, 1);
        q.enqueue(t("far", 1700, 0));
        assert!(peek_best_opponent(&q, 1500, 50, "requester", 10).is_none());
    }

    #[test]
    fn tie_break_prefers_older_then_lower_rank_then_user_id() {
        // uA(1000,t0), uC(1010,t10), uB(1010,t20), uR requests from 1000
        // with allowed=20. Candidates: 1000 excluded-self-rank is requester's
        // own rank so it's skipped via exclude; 1010 head is uC (older).
        let mut q = QueueState::new("shard", 0, 2000, 1);
        q.enqueue(t("uA", 1000, 0));
        q.enqueue(t("uC", 1010, 10));
        q.enqueue(t("uB", 1010, 20));
        let best = peek_best_opponent(&q, 1000, 20, "uR", 10).unwrap();
        assert_eq!(best.ticket.user_id, "uA");

        // From rank 1010 excluding uC, next candidate at 1010 is uB (second
        // in FIFO, skip-one lookahead), which beats 1000's uA by distance.
        let best2 = peek_best_opponent(&q, 1010, 20, "uC", 10).unwrap();
        assert_eq!(best2.ticket.user_id, "uB");
    }

    #[test]
    fn excluded_user_is_never_returned() {
        let mut q = QueueState::new("shard", 0, 2000, 1);
        q.enqueue(t("solo", 1500, 0));
        assert!(peek_best_opponent(&q, 1500, 100, "solo", 10).is_none());
    }

    #[test]
    fn scan_bound_limits_ranks_inspected() {
        let mut q = QueueState::new("shard", 0, 2000, 1);
        for r in 1..=20 {
            q.enqueue(t(&format!("u{r}"), 1500 + r, r as u64));
        }
        // allowed_diff covers all 20 ranks, but max_scan_ranks=1 limits the
        // search to the single closest rank (1501).
        let best = peek_best_opponent(&q, 1500, 100, "requester", 1).unwrap();
        assert_eq!(best.ticket.rank, 1501);
    }

    #[test]
    fn alternates_outward_breaking_ties_toward_lower_rank() {
        let mut q = QueueState::new("shard", 0, 2000, 1);
        q.enqueue(t("below", 1490, 0));
        q.enqueue(t("above", 1510, 0));
        // Both at distance 10; lower rank wins the tie.
        let best = peek_best_opponent(&q, 1500, 20, "requester", 10).unwrap();
        assert_eq!(best.ticket.user_id, "below");
    }

    #[test]
    fn peek_never_mutates_state() {
        let mut q = QueueState::new("shard", 0, 2000, 1);
        q.enqueue(t("a", 1500, 0));
        let before = q.queued_count();
        let _ = peek_best_opponent(&q, 1500, 100, "requester", 10);
        assert_eq!(q.queued_count(), before);
    }

    #[test]
    fn take_best_opponent_removes_exactly_the_peeked_ticket() {
        let mut q = QueueState::new("shard", 0, 2000, 1);
        q.enqueue(t("a", 1500, 0));
        let best = peek_best_opponent(&q, 1500, 100, "requester", 10).unwrap();
        take_best_opponent(&mut q, &best.ticket).unwrap();
        assert_eq!(q.queued_count(), 0);
    }
}
