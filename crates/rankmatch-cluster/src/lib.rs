// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cluster-level coordination for RankMatch: deterministic shard
//! assignment, the hot-path routing table, and per-node worker lifecycle.

pub mod coordinator;
pub mod manager;
pub mod router;

pub use coordinator::{compute, is_leader, Assignment, PartitionSpec, Snapshot};
pub use manager::PartitionManager;
pub use router::{RouteError, RouteTarget, Router};
