// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-node worker lifecycle: starts and stops [`rankmatch_worker`] actors
//! to match the assignments that target this node, debouncing rapid
//! successive `assignments_updated` broadcasts into one reconcile.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rankmatch_claim::{ClaimIndex, ClaimOwner};
use rankmatch_worker::{Clock, MatchPublisher, NeighborLookup, WorkerConfig, WorkerHandle};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::coordinator::Snapshot;
use crate::router::Router;

struct RunningWorker {
    handle: WorkerHandle,
    join: JoinHandle<()>,
}

/// Owns every [`rankmatch_worker`] actor assigned to this node, and
/// reconciles that set against each new [`Snapshot`].
pub struct PartitionManager {
    node_id: String,
    router: Arc<Router>,
    claims: Arc<ClaimIndex>,
    publisher: Arc<dyn MatchPublisher>,
    worker_config: WorkerConfig,
    debounce: Duration,
    running: Mutex<HashMap<(u64, String), RunningWorker>>,
    pending: Mutex<Option<Snapshot>>,
}

impl PartitionManager {
    /// Construct a manager for `node_id`, with no workers running yet.
    /// Call [`PartitionManager::rebalance`] with the coordinator's current
    /// snapshot once at startup.
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        router: Arc<Router>,
        claims: Arc<ClaimIndex>,
        publisher: Arc<dyn MatchPublisher>,
        worker_config: WorkerConfig,
        debounce: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            router,
            claims,
            publisher,
            worker_config,
            debounce,
            running: Mutex::new(HashMap::new()),
            pending: Mutex::new(None),
        }
    }

    /// Number of workers currently running on this node.
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Handle an `assignments_updated` broadcast: debounce briefly, then
    /// reconcile. Rapid successive calls coalesce into a single reconcile
    /// against the most recent snapshot.
    pub async fn on_assignments_updated(self: &Arc<Self>, snapshot: Snapshot) {
        let mut pending = self.pending.lock().await;
        let debounce_already_scheduled = pending.is_some();
        *pending = Some(snapshot);
        drop(pending);

        if debounce_already_scheduled {
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            let snapshot = this.pending.lock().await.take();
            if let Some(snapshot) = snapshot {
                this.reconcile(&snapshot).await;
            }
        });
    }

    /// Bypass the debounce and reconcile against `snapshot` immediately.
    pub async fn rebalance(&self, snapshot: &Snapshot) {
        self.reconcile(snapshot).await;
    }

    async fn reconcile(&self, snapshot: &Snapshot) {
        let desired: HashMap<(u64, String), (i64, i64)> = snapshot
            .assignments
            .iter()
            .filter(|a| a.node == self.node_id && a.epoch == snapshot.epoch)
            .map(|a| ((a.epoch, a.shard_id.clone()), (a.range_start, a.range_end)))
            .collect();

        let mut running = self.running.lock().await;

        let stale: Vec<(u64, String)> = running
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(worker) = running.remove(&key) {
                self.claims.release_owned_by(ClaimOwner {
                    epoch: key.0,
                    shard_id: key.1.clone(),
                });
                self.router.unregister_worker(key.0, &key.1);
                worker.join.abort();
                info!(epoch = key.0, shard_id = %key.1, "worker stopped");
            }
        }

        for (key, (range_start, range_end)) in desired {
            if running.contains_key(&key) {
                continue;
            }
            let (epoch, shard_id) = key.clone();
            let (handle, join) = rankmatch_worker::spawn(
                shard_id.clone(),
                range_start,
                range_end,
                epoch,
                self.worker_config,
                Clock::new(),
                Arc::clone(&self.claims),
                Arc::clone(&self.publisher),
                Arc::clone(&self.router) as Arc<dyn NeighborLookup>,
            );
            self.router
                .register_worker(epoch, shard_id.clone(), handle.clone());
            info!(epoch, shard_id = %shard_id, "worker started");
            running.insert(key, RunningWorker { handle, join });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{compute, PartitionSpec};
    use rankmatch_core::{BackpressureConfig, WideningConfig};

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            immediate_match_allowed_diff: 50,
            widening: WideningConfig {
                step_ms: 1_000,
                step_diff: 25,
                cap: 1_000,
            },
            backpressure: BackpressureConfig {
                message_queue_limit: 1_000,
                queued_count_limit: 10_000,
            },
            max_scan_ranks: 64,
            max_tick_attempts: 8,
            tick_interval: Duration::from_millis(250),
            rpc_timeout: Duration::from_millis(150),
            mailbox_capacity: 64,
        }
    }

    fn manager() -> Arc<PartitionManager> {
        Arc::new(PartitionManager::new(
            "n1",
            Arc::new(Router::new()),
            Arc::new(ClaimIndex::new(4)),
            Arc::new(rankmatch_worker::NullPublisher),
            worker_config(),
            Duration::from_millis(10),
        ))
    }

    #[tokio::test]
    async fn rebalance_starts_every_assignment_targeting_this_node() {
        let mgr = manager();
        let snap = compute(
            &["n1".to_string(), "n2".to_string()],
            PartitionSpec {
                rank_min: 0,
                rank_max: 3_999,
                partition_count: 4,
            },
            1,
            0,
        );
        mgr.rebalance(&snap).await;
        assert_eq!(mgr.running_count().await, 2); // shards 0 and 2 round-robin to n1
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let mgr = manager();
        let snap = compute(
            &["n1".to_string()],
            PartitionSpec {
                rank_min: 0,
                rank_max: 999,
                partition_count: 1,
            },
            1,
            0,
        );
        mgr.rebalance(&snap).await;
        mgr.rebalance(&snap).await;
        assert_eq!(mgr.running_count().await, 1);
    }

    #[tokio::test]
    async fn epoch_change_stops_old_and_starts_new() {
        let mgr = manager();
        let snap1 = compute(
            &["n1".to_string()],
            PartitionSpec {
                rank_min: 0,
                rank_max: 999,
                partition_count: 1,
            },
            1,
            0,
        );
        mgr.rebalance(&snap1).await;
        assert_eq!(mgr.running_count().await, 1);

        let snap2 = compute(
            &["n1".to_string()],
            PartitionSpec {
                rank_min: 0,
                rank_max: 999,
                partition_count: 1,
            },
            2,
            10,
        );
        mgr.rebalance(&snap2).await;
        assert_eq!(mgr.running_count().await, 1);
    }

    #[tokio::test]
    async fn debounced_updates_coalesce_into_one_reconcile() {
        let mgr = manager();
        let spec = PartitionSpec {
            rank_min: 0,
            rank_max: 999,
            partition_count: 1,
        };
        let snap_a = compute(&["n1".to_string()], spec, 1, 0);
        let snap_b = compute(&["n1".to_string()], spec, 2, 1);

        mgr.on_assignments_updated(snap_a).await;
        mgr.on_assignments_updated(snap_b).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mgr.running_count().await, 1);
    }
}
