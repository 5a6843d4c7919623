// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hot-path rank -> shard routing, with lock-free reads off an
//! atomically-swapped table (mirrors `spark-router`'s `ArcSwap`-backed
//! `DefaultRouter`) and a worker registry keyed by `(epoch, shard_id)`
//! (mirrors the kafka-dedup `PartitionRouter`'s `DashMap` registry).

use std::cmp::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use rankmatch_worker::{NeighborLookup, WorkerHandle};
use thiserror::Error;
use tracing::debug;

use crate::coordinator::{Assignment, Snapshot};

/// A resolved route: which worker, on which node, serves a rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// Epoch the resolving table was built under.
    pub epoch: u64,
    /// Shard serving the requested rank.
    pub shard_id: String,
    /// Node the shard is assigned to.
    pub node: String,
}

/// Failure outcomes for [`Router::route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No partition covers the requested rank.
    #[error("invalid rank")]
    InvalidRank,
    /// The routing table is empty (startup or transient).
    #[error("no partition")]
    NoPartition,
    /// The table's epoch is older than the epoch the caller expects.
    #[error("stale routing snapshot")]
    StaleRoutingSnapshot,
}

struct RoutingTable {
    epoch: u64,
    assignments: Vec<Assignment>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            epoch: 0,
            assignments: Vec::new(),
        }
    }
}

/// Atomically-replaceable rank -> shard routing table, plus the live
/// worker registry used to resolve a shard id to a callable handle.
pub struct Router {
    table: ArcSwap<RoutingTable>,
    registry: DashMap<(u64, String), WorkerHandle>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Construct a router with an empty table. Every `route` call fails
    /// with [`RouteError::NoPartition`] until [`Router::update`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RoutingTable::default()),
            registry: DashMap::new(),
        }
    }

    /// Atomically replace the routing table with a freshly computed
    /// snapshot. Assignments are sorted by `range_start` for binary search.
    pub fn update(&self, snapshot: &Snapshot) {
        let mut assignments = snapshot.assignments.clone();
        assignments.sort_by_key(|a| a.range_start);
        debug!(
            epoch = snapshot.epoch,
            assignments = assignments.len(),
            "routing table swapped"
        );
        self.table.store(Arc::new(RoutingTable {
            epoch: snapshot.epoch,
            assignments,
        }));
    }

    /// Register a live worker handle so it can be resolved by
    /// `(epoch, shard_id)` from [`Router::route`] and [`NeighborLookup`].
    pub fn register_worker(&self, epoch: u64, shard_id: String, handle: WorkerHandle) {
        self.registry.insert((epoch, shard_id), handle);
    }

    /// Remove a worker from the registry, e.g. just before it is stopped.
    pub fn unregister_worker(&self, epoch: u64, shard_id: &str) {
        self.registry.remove(&(epoch, shard_id.to_string()));
    }

    /// Resolve a worker handle directly by `(epoch, shard_id)`.
    #[must_use]
    pub fn worker_handle(&self, epoch: u64, shard_id: &str) -> Option<WorkerHandle> {
        self.registry
            .get(&(epoch, shard_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Resolve the shard that serves `rank`, failing with
    /// [`RouteError::StaleRoutingSnapshot`] if the table's epoch does not
    /// match `current_epoch` (the caller retries with a fresh route once
    /// it observes the new epoch).
    ///
    /// # Errors
    ///
    /// See [`RouteError`].
    pub fn route(&self, rank: i64, current_epoch: u64) -> Result<RouteTarget, RouteError> {
        let table = self.table.load();
        if table.epoch != current_epoch {
            return Err(RouteError::StaleRoutingSnapshot);
        }
        if table.assignments.is_empty() {
            return Err(RouteError::NoPartition);
        }
        let idx = table
            .assignments
            .binary_search_by(|a| {
                if rank < a.range_start {
                    Ordering::Greater
                } else if rank > a.range_end {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .map_err(|_| RouteError::InvalidRank)?;
        let assignment = &table.assignments[idx];
        Ok(RouteTarget {
            epoch: table.epoch,
            shard_id: assignment.shard_id.clone(),
            node: assignment.node.clone(),
        })
    }
}

impl NeighborLookup for Router {
    fn left(&self, epoch: u64, shard_id: &str) -> Option<WorkerHandle> {
        let table = self.table.load();
        if table.epoch != epoch {
            return None;
        }
        let this = table.assignments.iter().find(|a| a.shard_id == shard_id)?;
        let neighbor = table
            .assignments
            .iter()
            .find(|a| a.range_end + 1 == this.range_start)?;
        self.worker_handle(epoch, &neighbor.shard_id)
    }

    fn right(&self, epoch: u64, shard_id: &str) -> Option<WorkerHandle> {
        let table = self.table.load();
        if table.epoch != epoch {
            return None;
        }
        let this = table.assignments.iter().find(|a| a.shard_id == shard_id)?;
        let neighbor = table
            .assignments
            .iter()
            .find(|a| a.range_start - 1 == this.range_end)?;
        self.worker_handle(epoch, &neighbor.shard_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{compute, PartitionSpec};

    fn snapshot() -> Snapshot {
        compute(
            &["n1".to_string()],
            PartitionSpec {
                rank_min: 0,
                rank_max: 2_999,
                partition_count: 3,
            },
            1,
            0,
        )
    }

    #[test]
    fn route_before_any_update_is_no_partition() {
        let router = Router::new();
        assert_eq!(router.route(10, 0), Err(RouteError::NoPartition));
    }

    #[test]
    fn route_resolves_the_containing_shard() {
        let router = Router::new();
        let snap = snapshot();
        router.update(&snap);
        let target = router.route(1_500, 1).unwrap();
        assert_eq!(target.shard_id, "p-01000-01999");
        assert_eq!(target.node, "n1");
    }

    #[test]
    fn route_with_wrong_epoch_is_stale() {
        let router = Router::new();
        router.update(&snapshot());
        assert_eq!(router.route(10, 99), Err(RouteError::StaleRoutingSnapshot));
    }

    #[test]
    fn route_out_of_range_is_invalid() {
        let router = Router::new();
        router.update(&snapshot());
        assert_eq!(router.route(-1, 1), Err(RouteError::InvalidRank));
        assert_eq!(router.route(3_000, 1), Err(RouteError::InvalidRank));
    }

    #[tokio::test]
    async fn adjacent_resolves_registered_neighbors() {
        let router = Router::new();
        router.update(&snapshot());

        assert!(router.left(1, "p-01000-01999").is_none());
        assert!(router.right(1, "p-00000-00999").is_none());

        let claims = Arc::new(rankmatch_claim::ClaimIndex::new(1));
        let (handle, _join) = rankmatch_worker::spawn(
            "p-00000-00999",
            0,
            999,
            1,
            test_worker_config(),
            rankmatch_worker::Clock::new(),
            claims,
            Arc::new(rankmatch_worker::NullPublisher),
            Arc::new(rankmatch_worker::NoNeighbors),
        );
        router.register_worker(1, "p-00000-00999".to_string(), handle);

        let left = router.left(1, "p-01000-01999");
        assert!(left.is_some());
        assert_eq!(left.unwrap().shard_id, "p-00000-00999");
    }

    fn test_worker_config() -> rankmatch_worker::WorkerConfig {
        rankmatch_worker::WorkerConfig {
            immediate_match_allowed_diff: 50,
            widening: rankmatch_core::WideningConfig {
                step_ms: 1_000,
                step_diff: 25,
                cap: 1_000,
            },
            backpressure: rankmatch_core::BackpressureConfig {
                message_queue_limit: 1_000,
                queued_count_limit: 10_000,
            },
            max_scan_ranks: 64,
            max_tick_attempts: 8,
            tick_interval: std::time::Duration::from_millis(250),
            rpc_timeout: std::time::Duration::from_millis(150),
            mailbox_capacity: 64,
        }
    }
}
