// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The client-facing handle to a running [`crate::actor`] task, and the
//! message/reply shapes its mailbox speaks.

use std::time::Duration;

use rankmatch_core::Ticket;
use tokio::sync::{mpsc, oneshot};

/// A request to enqueue a user at a rank, addressed to a specific
/// `(epoch, shard_id)` so a stale route is rejected rather than silently
/// misrouted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueEnvelope {
    /// Epoch the caller believes this shard is running under.
    pub epoch: u64,
    /// Shard the caller believes serves `rank`.
    pub shard_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Requested rank.
    pub rank: i64,
}

/// Successful outcome of [`enqueue`]. The core contract makes no
/// distinction between "queued" and "matched immediately" at this layer —
/// both are `Accepted`; a match (if any) is observed via subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The request was accepted (queued, or matched and released).
    Accepted,
}

/// Failure outcomes for [`enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The envelope's epoch does not match the worker's active epoch.
    #[error("stale epoch")]
    StaleEpoch,
    /// The shard is over its backpressure thresholds.
    #[error("overloaded")]
    Overloaded,
    /// The rank falls outside this shard's `[range_start, range_end]`.
    #[error("out of range")]
    OutOfRange,
}

/// Outcome of a [`peek_nearest`] RPC, from the callee's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeekOutcome {
    /// An opponent within tolerance was found (never mutates callee state).
    Found(Ticket),
    /// No opponent within tolerance.
    None,
}

/// Outcome of a [`reserve`] RPC, from the callee's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The exact ticket was removed; ownership transfers to the caller, who
    /// is now responsible for releasing both participants' claims.
    Reserved(Ticket),
    /// The head at `rank` no longer matches; caller must roll back.
    NotFound,
}

/// Errors shared by both cross-shard RPCs, raised by the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EpochMismatch {
    /// The envelope's epoch does not match the callee's active epoch.
    #[error("epoch mismatch")]
    EpochMismatch,
}

/// Failures observed by the *caller* of a cross-shard RPC: either the
/// callee answered with a protocol error, or the call itself never
/// completed. Both are dropped candidates — never fatal to the caller's
/// own tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RpcFailure {
    /// The callee's reply did not arrive before `rpc_timeout_ms`.
    #[error("rpc timed out")]
    Timeout,
    /// The callee's mailbox is gone (worker stopped).
    #[error("callee unavailable")]
    Unavailable,
}

/// Liveness/diagnostic snapshot returned by [`health_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    /// Tickets currently queued in this shard.
    pub queued_count: usize,
    /// Milliseconds since this worker started.
    pub uptime_ms: u64,
}

pub(crate) enum WorkerMsg {
    Enqueue {
        envelope: EnqueueEnvelope,
        reply: oneshot::Sender<Result<EnqueueOutcome, EnqueueError>>,
    },
    PeekNearest {
        rank: i64,
        allowed_diff: u64,
        exclude_user_id: String,
        epoch: u64,
        reply: oneshot::Sender<Result<PeekOutcome, EpochMismatch>>,
    },
    Reserve {
        user_id: String,
        rank: i64,
        enqueued_at_ms: u64,
        epoch: u64,
        reply: oneshot::Sender<Result<ReserveOutcome, EpochMismatch>>,
    },
    HealthCheck {
        reply: oneshot::Sender<HealthReport>,
    },
}

/// A cloneable reference to a running partition worker's mailbox, tagged
/// with the routing metadata callers need without a round trip.
#[derive(Clone)]
pub struct WorkerHandle {
    /// Assignment epoch this worker was started under.
    pub epoch: u64,
    /// Stable shard identifier, e.g. `p-01000-01999`.
    pub shard_id: String,
    /// Inclusive lower bound of ranks this worker serves.
    pub range_start: i64,
    /// Inclusive upper bound of ranks this worker serves.
    pub range_end: i64,
    pub(crate) tx: mpsc::Sender<WorkerMsg>,
}

impl WorkerHandle {
    /// Current mailbox depth, used by the caller-side backpressure check
    /// before handing off an enqueue (the callee re-checks authoritatively).
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Submit an enqueue request with a deadline.
///
/// # Errors
///
/// Returns [`RpcFailure::Timeout`] if no reply arrives within `timeout`, or
/// [`RpcFailure::Unavailable`] if the worker's mailbox is closed. A reply
/// that does arrive is always `Ok(Err(EnqueueError))` on the inner
/// `Result`, never folded into `RpcFailure`.
pub async fn enqueue(
    handle: &WorkerHandle,
    envelope: EnqueueEnvelope,
    timeout: Duration,
) -> Result<Result<EnqueueOutcome, EnqueueError>, RpcFailure> {
    let (reply_tx, reply_rx) = oneshot::channel();
    handle
        .tx
        .send(WorkerMsg::Enqueue {
            envelope,
            reply: reply_tx,
        })
        .await
        .map_err(|_| RpcFailure::Unavailable)?;
    await_reply(reply_rx, timeout).await
}

/// Cross-shard peek RPC (read-only on the callee).
///
/// # Errors
///
/// See [`enqueue`] for the timeout/unavailable cases; a completed call
/// additionally surfaces [`EpochMismatch`] from the callee on the inner
/// `Result`.
pub async fn peek_nearest(
    handle: &WorkerHandle,
    rank: i64,
    allowed_diff: u64,
    exclude_user_id: &str,
    epoch: u64,
    timeout: Duration,
) -> Result<Result<PeekOutcome, EpochMismatch>, RpcFailure> {
    let (reply_tx, reply_rx) = oneshot::channel();
    handle
        .tx
        .send(WorkerMsg::PeekNearest {
            rank,
            allowed_diff,
            exclude_user_id: exclude_user_id.to_string(),
            epoch,
            reply: reply_tx,
        })
        .await
        .map_err(|_| RpcFailure::Unavailable)?;
    await_reply(reply_rx, timeout).await
}

/// Cross-shard reserve RPC — second phase of a tick-driven match commit.
///
/// # Errors
///
/// See [`peek_nearest`].
pub async fn reserve(
    handle: &WorkerHandle,
    user_id: &str,
    rank: i64,
    enqueued_at_ms: u64,
    epoch: u64,
    timeout: Duration,
) -> Result<Result<ReserveOutcome, EpochMismatch>, RpcFailure> {
    let (reply_tx, reply_rx) = oneshot::channel();
    handle
        .tx
        .send(WorkerMsg::Reserve {
            user_id: user_id.to_string(),
            rank,
            enqueued_at_ms,
            epoch,
            reply: reply_tx,
        })
        .await
        .map_err(|_| RpcFailure::Unavailable)?;
    await_reply(reply_rx, timeout).await
}

/// Trivial liveness probe; always succeeds unless the worker is gone.
///
/// # Errors
///
/// Returns [`RpcFailure::Unavailable`] if the worker's mailbox is closed, or
/// [`RpcFailure::Timeout`] if it did not answer in time.
pub async fn health_check(
    handle: &WorkerHandle,
    timeout: Duration,
) -> Result<HealthReport, RpcFailure> {
    let (reply_tx, reply_rx) = oneshot::channel();
    handle
        .tx
        .send(WorkerMsg::HealthCheck { reply: reply_tx })
        .await
        .map_err(|_| RpcFailure::Unavailable)?;
    match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(_)) | Err(_) => Err(RpcFailure::Unavailable),
    }
}

async fn await_reply<T>(
    reply_rx: oneshot::Receiver<T>,
    timeout: Duration,
) -> Result<T, RpcFailure> {
    match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(RpcFailure::Unavailable),
        Err(_) => Err(RpcFailure::Timeout),
    }
}
