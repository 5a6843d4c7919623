// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `add_request` orchestration: validate, claim, route, enqueue, and
//! release the claim on every path that does not end in `ok`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rankmatch_claim::{ClaimError, ClaimIndex, ClaimOwner};
use rankmatch_cluster::{RouteError, Router};
use rankmatch_worker::{EnqueueEnvelope, EnqueueError, RpcFailure};
use thiserror::Error;

/// Every outcome `add_request` can surface to a client, as a stable error
/// string clients can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    /// `user_id` was empty or all whitespace.
    #[error("userId must be a non-empty string")]
    EmptyUserId,
    /// `rank` was negative.
    #[error("rank must be a non-negative integer")]
    NegativeRank,
    /// `user_id` already has an outstanding ticket somewhere in the cluster.
    #[error("already_queued")]
    AlreadyQueued,
    /// `rank` falls outside the configured valid range.
    #[error("invalid_rank")]
    InvalidRank,
    /// The target shard is over its backpressure thresholds.
    #[error("overloaded")]
    Overloaded,
    /// The target worker is running an older epoch than this request.
    #[error("stale_epoch")]
    StaleEpoch,
    /// The routing table has no assignments yet.
    #[error("no_partition")]
    NoPartition,
    /// A transient cluster condition (stale routing snapshot, unreachable
    /// claim shard, or a worker that reported a range mismatch); safe to
    /// retry without a different `user_id`.
    #[error("momentary interruption, try again")]
    MomentaryInterruption,
}

impl From<ClaimError> for RequestError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::AlreadyQueued => Self::AlreadyQueued,
            ClaimError::IndexUnavailable => Self::MomentaryInterruption,
        }
    }
}

impl From<RouteError> for RequestError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::InvalidRank => Self::InvalidRank,
            RouteError::NoPartition => Self::NoPartition,
            RouteError::StaleRoutingSnapshot => Self::MomentaryInterruption,
        }
    }
}

impl From<EnqueueError> for RequestError {
    fn from(err: EnqueueError) -> Self {
        match err {
            EnqueueError::StaleEpoch => Self::StaleEpoch,
            EnqueueError::Overloaded => Self::Overloaded,
            EnqueueError::OutOfRange => Self::MomentaryInterruption,
        }
    }
}

impl From<RpcFailure> for RequestError {
    fn from(_: RpcFailure) -> Self {
        Self::Overloaded
    }
}

/// Claims, routes, and enqueues `add_request` calls against the cluster's
/// live [`Router`] and [`ClaimIndex`].
///
/// The active epoch is tracked separately from the routing table so a
/// coordinator-driven epoch bump (see `rankmatch-cluster::coordinator`) is
/// picked up by the next call without restarting the handler.
pub struct RequestHandler {
    claims: Arc<ClaimIndex>,
    router: Arc<Router>,
    epoch: AtomicU64,
    enqueue_timeout: Duration,
}

impl RequestHandler {
    /// Build a handler bound to `claims`/`router`, starting at `epoch`.
    #[must_use]
    pub fn new(
        claims: Arc<ClaimIndex>,
        router: Arc<Router>,
        epoch: u64,
        enqueue_timeout: Duration,
    ) -> Self {
        Self {
            claims,
            router,
            epoch: AtomicU64::new(epoch),
            enqueue_timeout,
        }
    }

    /// Update the epoch new requests are routed and claimed under, after a
    /// `assignments_updated` broadcast bumps the coordinator's epoch.
    pub fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::Release);
    }

    /// Validate, claim, route, and enqueue one `add_request` call.
    ///
    /// # Errors
    ///
    /// See [`RequestError`]. On every error path the claim (if taken) is
    /// released before returning.
    pub async fn add_request(&self, user_id: &str, rank: i64) -> Result<(), RequestError> {
        if user_id.trim().is_empty() {
            return Err(RequestError::EmptyUserId);
        }
        if rank < 0 {
            return Err(RequestError::NegativeRank);
        }

        self.claims.claim(user_id).await?;

        let epoch = self.epoch.load(Ordering::Acquire);
        match self.route_and_enqueue(user_id, rank, epoch).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.claims.release(user_id);
                Err(err)
            }
        }
    }

    async fn route_and_enqueue(
        &self,
        user_id: &str,
        rank: i64,
        epoch: u64,
    ) -> Result<(), RequestError> {
        let target = self.router.route(rank, epoch)?;
        self.claims.set_owner(
            user_id,
            ClaimOwner {
                epoch: target.epoch,
                shard_id: target.shard_id.clone(),
            },
        );
        self.try_enqueue(user_id, rank, &target.shard_id, epoch).await
    }

    async fn try_enqueue(
        &self,
        user_id: &str,
        rank: i64,
        shard_id: &str,
        epoch: u64,
    ) -> Result<(), RequestError> {
        let Some(handle) = self.router.worker_handle(epoch, shard_id) else {
            return Err(RequestError::MomentaryInterruption);
        };
        let envelope = EnqueueEnvelope {
            epoch,
            shard_id: shard_id.to_string(),
            user_id: user_id.to_string(),
            rank,
        };
        rankmatch_worker::enqueue(&handle, envelope, self.enqueue_timeout).await??;
        Ok(())
    }
}
