// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cluster-wide single-enqueue claim index.
//!
//! A user_id may have at most one outstanding ticket anywhere in the
//! cluster. The index is sharded by hash of `user_id` over a fixed shard
//! count; each shard owns its own lock so claim traffic for unrelated
//! users never contends. Claims live only in memory — a node restart
//! loses every claim it held, by design.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use tracing::warn;

/// Identifies the worker that currently holds a user's claim, so a
/// [`ClaimIndex`] entry can be proactively released when that worker is
/// stopped (narrowing, not eliminating, the crash-leak window a claim
/// index without owner tracking would otherwise have).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimOwner {
    /// Assignment epoch the owning worker was started under.
    pub epoch: u64,
    /// Shard the owning worker serves.
    pub shard_id: String,
}

/// Outcome of a successful [`ClaimIndex::claim`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claimed {
    /// The user_id was not previously claimed; it is now.
    Ok,
}

/// Failure outcomes for [`ClaimIndex::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// The user already has an outstanding claim.
    #[error("user already queued")]
    AlreadyQueued,
    /// The owning shard could not be locked after retrying.
    #[error("claim shard unavailable")]
    IndexUnavailable,
}

struct Shard {
    // `None` until `set_owner` runs; a bare `claim` has no owner to record
    // yet, and the entry must still be visible to a concurrent `claim` as
    // "already queued" in that window.
    entries: Mutex<HashMap<String, Option<ClaimOwner>>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

/// Sharded set of currently-claimed user_ids.
pub struct ClaimIndex {
    shards: Vec<Shard>,
    retry_attempts: u32,
    retry_spacing: Duration,
}

impl ClaimIndex {
    /// Create an index with `shard_count` independent lock shards.
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is zero.
    #[must_use]
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "ClaimIndex requires at least one shard");
        Self {
            shards: (0..shard_count).map(|_| Shard::new()).collect(),
            retry_attempts: 3,
            retry_spacing: Duration::from_millis(20),
        }
    }

    fn shard_for(&self, user_id: &str) -> &Shard {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        user_id.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Compare-and-insert `user_id`, with no owner recorded yet.
    ///
    /// This is the bare existence check: it must run ahead of routing, so a
    /// caller that cannot resolve a route for an otherwise-already-queued
    /// user still observes `already_queued` rather than a routing error.
    /// Callers that go on to route successfully should follow up with
    /// [`ClaimIndex::set_owner`].
    ///
    /// Retries a bounded number of times, spaced `retry_spacing` apart, if
    /// the shard's lock is poisoned (a prior holder panicked mid-claim)
    /// before giving up with [`ClaimError::IndexUnavailable`].
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::AlreadyQueued`] if `user_id` is already
    /// claimed, or [`ClaimError::IndexUnavailable`] if the shard could not
    /// be locked after retrying.
    pub async fn claim(&self, user_id: &str) -> Result<Claimed, ClaimError> {
        let shard = self.shard_for(user_id);
        for attempt in 0..self.retry_attempts {
            match shard.entries.lock() {
                Ok(mut guard) => {
                    return if guard.contains_key(user_id) {
                        Err(ClaimError::AlreadyQueued)
                    } else {
                        guard.insert(user_id.to_string(), None);
                        Ok(Claimed::Ok)
                    };
                }
                Err(poisoned) => {
                    if attempt + 1 == self.retry_attempts {
                        warn!(%user_id, "claim shard unavailable after retries exhausted");
                        return Err(ClaimError::IndexUnavailable);
                    }
                    // A prior holder panicked; salvage the map and retry rather
                    // than leaving the shard permanently wedged.
                    drop(poisoned);
                    tokio::time::sleep(self.retry_spacing).await;
                }
            }
        }
        Err(ClaimError::IndexUnavailable)
    }

    /// Tag an existing claim with the worker that now owns it, so
    /// [`ClaimIndex::release_owned_by`] can find it later.
    ///
    /// A no-op if `user_id` has no outstanding claim (it was released or
    /// never claimed) — callers only reach this after their own successful
    /// [`ClaimIndex::claim`], so that case is not expected in practice, just
    /// tolerated.
    pub fn set_owner(&self, user_id: &str, owner: ClaimOwner) {
        let shard = self.shard_for(user_id);
        match shard.entries.lock() {
            Ok(mut guard) => {
                if let Some(slot) = guard.get_mut(user_id) {
                    *slot = Some(owner);
                }
            }
            Err(mut poisoned) => {
                if let Some(slot) = poisoned.get_mut().get_mut(user_id) {
                    *slot = Some(owner);
                }
            }
        }
    }

    /// Idempotent remove. A no-op if `user_id` is not currently claimed.
    pub fn release(&self, user_id: &str) {
        let shard = self.shard_for(user_id);
        match shard.entries.lock() {
            Ok(mut guard) => {
                guard.remove(user_id);
            }
            Err(mut poisoned) => {
                poisoned.get_mut().remove(user_id);
            }
        }
    }

    /// Release every claim currently owned by `owner`.
    ///
    /// Called by `PartitionManager` just before it stops a worker, so
    /// in-flight claims for tickets that worker held don't leak until the
    /// next full index sweep — an additive narrowing of the crash-leak
    /// window, not a change to claim semantics.
    pub fn release_owned_by(&self, owner: ClaimOwner) {
        let owner = Some(owner);
        for shard in &self.shards {
            match shard.entries.lock() {
                Ok(mut guard) => guard.retain(|_, o| *o != owner),
                Err(mut poisoned) => poisoned.get_mut().retain(|_, o| *o != owner),
            }
        }
    }

    /// Whether `user_id` currently holds a claim. Test/diagnostic helper.
    #[must_use]
    pub fn is_claimed(&self, user_id: &str) -> bool {
        let shard = self.shard_for(user_id);
        match shard.entries.lock() {
            Ok(guard) => guard.contains_key(user_id),
            Err(poisoned) => poisoned.get_ref().contains_key(user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> ClaimOwner {
        ClaimOwner {
            epoch: 1,
            shard_id: "p-00000-00999".to_string(),
        }
    }

    #[tokio::test]
    async fn claim_then_release_then_claim_succeeds() {
        let idx = ClaimIndex::new(4);
        assert_eq!(idx.claim("u1").await.unwrap(), Claimed::Ok);
        idx.release("u1");
        assert_eq!(idx.claim("u1").await.unwrap(), Claimed::Ok);
    }

    #[tokio::test]
    async fn second_claim_before_release_is_rejected() {
        let idx = ClaimIndex::new(4);
        idx.claim("u1").await.unwrap();
        assert_eq!(
            idx.claim("u1").await.unwrap_err(),
            ClaimError::AlreadyQueued
        );
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let idx = ClaimIndex::new(4);
        idx.claim("u1").await.unwrap();
        idx.release("u1");
        idx.release("u1");
        idx.release("u1");
        assert!(!idx.is_claimed("u1"));
    }

    #[tokio::test]
    async fn distinct_users_claim_independently() {
        let idx = ClaimIndex::new(4);
        idx.claim("u1").await.unwrap();
        idx.claim("u2").await.unwrap();
        assert!(idx.is_claimed("u1"));
        assert!(idx.is_claimed("u2"));
    }

    #[tokio::test]
    async fn claim_before_owner_is_set_still_blocks_a_second_claim() {
        let idx = ClaimIndex::new(4);
        idx.claim("u1").await.unwrap();
        assert_eq!(
            idx.claim("u1").await.unwrap_err(),
            ClaimError::AlreadyQueued
        );
        idx.set_owner("u1", owner());
        assert_eq!(
            idx.claim("u1").await.unwrap_err(),
            ClaimError::AlreadyQueued
        );
    }

    #[tokio::test]
    async fn release_owned_by_clears_only_matching_owner() {
        let idx = ClaimIndex::new(4);
        let a = ClaimOwner {
            epoch: 1,
            shard_id: "p-00000-00999".to_string(),
        };
        let b = ClaimOwner {
            epoch: 1,
            shard_id: "p-01000-01999".to_string(),
        };
        idx.claim("u1").await.unwrap();
        idx.set_owner("u1", a.clone());
        idx.claim("u2").await.unwrap();
        idx.set_owner("u2", b);
        idx.release_owned_by(a);
        assert!(!idx.is_claimed("u1"));
        assert!(idx.is_claimed("u2"));
    }

    #[tokio::test]
    async fn release_owned_by_ignores_entries_with_no_owner_set() {
        let idx = ClaimIndex::new(4);
        idx.claim("u1").await.unwrap();
        idx.release_owned_by(owner());
        assert!(idx.is_claimed("u1"), "an unowned entry never matches any owner");
    }
}
