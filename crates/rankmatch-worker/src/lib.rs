// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The per-shard matchmaking actor.
//!
//! A `PartitionWorker` owns exactly one [`rankmatch_core::QueueState`] and
//! serializes every access to it through a tokio mailbox: enqueue requests,
//! cross-shard `peek_nearest`/`reserve` RPCs, health checks, and the
//! periodic widening tick all funnel through [`actor::run`]'s single
//! `select!` loop. Nothing outside that loop ever touches the queue state
//! directly — this is what makes `dequeue_head_if_matches` linearizable
//! without a lock (see `rankmatch_core::queue`).

mod actor;
mod clock;
mod handle;
mod neighbors;
mod publisher;

pub use actor::{spawn, WorkerConfig};
pub use clock::Clock;
pub use handle::{
    enqueue, health_check, peek_nearest, reserve, EnqueueEnvelope, EnqueueError, EnqueueOutcome,
    EpochMismatch, HealthReport, PeekOutcome, ReserveOutcome, RpcFailure, WorkerHandle,
};
pub use neighbors::{NeighborLookup, NoNeighbors};
pub use publisher::{MatchPublisher, NullPublisher};
