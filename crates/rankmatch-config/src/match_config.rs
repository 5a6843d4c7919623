// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Server-wide matchmaking configuration, as loaded by `rankmatchd`.

use serde::{Deserialize, Serialize};

/// Mailbox-depth / queue-size overload thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureSettings {
    /// Mailbox-depth overload threshold.
    pub message_queue_limit: usize,
    /// Per-shard queue-size overload threshold.
    pub queued_count_limit: usize,
}

impl Default for BackpressureSettings {
    fn default() -> Self {
        Self {
            message_queue_limit: 1000,
            queued_count_limit: 10_000,
        }
    }
}

/// Every tunable a RankMatch node needs, loaded as a single TOML
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Inclusive lower bound of valid ranks.
    pub rank_min: i64,
    /// Inclusive upper bound of valid ranks.
    pub rank_max: i64,
    /// Number of shards to partition `[rank_min, rank_max]` into.
    pub partition_count: u32,
    /// Number of `ClaimIndex` hash-shards.
    pub user_index_shard_count: usize,
    /// Rank tolerance checked on enqueue's immediate-match fast path.
    pub immediate_match_allowed_diff: u64,
    /// Age increment (ms) per widening step.
    pub widening_step_ms: u64,
    /// Rank-tolerance increment per widening step.
    pub widening_step_diff: u64,
    /// Maximum `allowed_diff` reachable through widening.
    pub widening_cap: u64,
    /// Worker tick cadence, in milliseconds.
    pub tick_interval_ms: u64,
    /// Upper bound on matches attempted per tick.
    pub max_tick_attempts: usize,
    /// Upper bound on distinct ranks inspected per search.
    pub max_scan_ranks: usize,
    /// Cross-shard RPC deadline, in milliseconds.
    pub rpc_timeout_ms: u64,
    /// Client-to-worker enqueue deadline, in milliseconds.
    pub enqueue_timeout_ms: u64,
    /// Backpressure thresholds.
    pub backpressure: BackpressureSettings,
    /// Active assignment version.
    pub epoch: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            rank_min: 0,
            rank_max: 9_999,
            partition_count: 10,
            user_index_shard_count: 16,
            immediate_match_allowed_diff: 50,
            widening_step_ms: 1_000,
            widening_step_diff: 25,
            widening_cap: 1_000,
            tick_interval_ms: 250,
            max_tick_attempts: 8,
            max_scan_ranks: 64,
            rpc_timeout_ms: 150,
            enqueue_timeout_ms: 500,
            backpressure: BackpressureSettings::default(),
            epoch: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = MatchConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: MatchConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn partial_toml_document_fills_in_defaults() {
        let partial = "rank_max = 500\npartition_count = 4\n";
        let parsed: MatchConfig = toml::from_str(partial).unwrap();
        assert_eq!(parsed.rank_max, 500);
        assert_eq!(parsed.partition_count, 4);
        assert_eq!(parsed.rank_min, MatchConfig::default().rank_min);
    }
}
