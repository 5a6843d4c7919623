// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! RankMatch matchmaking daemon.
//!
//! Loads `MatchConfig`, computes the deterministic shard assignment for the
//! configured node set, starts every shard assigned to this node, and
//! serves `add_request`/`subscribe_matches` over a Unix socket until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use rankmatch_claim::ClaimIndex;
use rankmatch_cluster::{compute, PartitionManager, PartitionSpec, Router};
use rankmatch_config::{ConfigService, MatchConfig};
use rankmatch_config_fs::FsConfigStore;
use rankmatch_edge::{hub_publisher, run_hub, RequestHandler};
use rankmatch_worker::WorkerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for `rankmatchd`.
#[derive(Parser, Debug)]
#[command(author, version, about = "RankMatch matchmaking daemon")]
struct Args {
    /// Stable identifier for this node, used in shard assignment.
    #[arg(long)]
    node_id: String,
    /// Every node id participating in this cluster, including this one.
    /// Defaults to a single-node cluster containing only `--node-id`.
    #[arg(long = "peer")]
    peers: Vec<String>,
    /// Unix socket path the edge hub listens on. Defaults to
    /// `rankmatch_proto::default_socket_path()`.
    #[arg(long)]
    socket_path: Option<PathBuf>,
    /// Override the platform config directory (mainly for tests).
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// Debounce window for coalescing rapid assignment updates.
    #[arg(long, default_value_t = 50)]
    rebalance_debounce_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let store = match &args.config_dir {
        Some(dir) => FsConfigStore::at(dir).context("open config dir")?,
        None => FsConfigStore::new().context("resolve platform config dir")?,
    };
    let config_service = ConfigService::new(store);
    let config: MatchConfig = config_service
        .load("match")
        .context("load match config")?
        .unwrap_or_default();
    let _ = config_service.save("match", &config);

    let nodes = if args.peers.is_empty() {
        vec![args.node_id.clone()]
    } else {
        args.peers.clone()
    };

    let socket_path = args
        .socket_path
        .clone()
        .unwrap_or_else(rankmatch_proto::default_socket_path);

    let claims = Arc::new(ClaimIndex::new(config.user_index_shard_count));
    let router = Arc::new(Router::new());
    let (publisher, matches_rx) = hub_publisher();

    let worker_config = WorkerConfig {
        immediate_match_allowed_diff: config.immediate_match_allowed_diff,
        widening: rankmatch_core::WideningConfig {
            step_ms: config.widening_step_ms,
            step_diff: config.widening_step_diff,
            cap: config.widening_cap,
        },
        backpressure: rankmatch_core::BackpressureConfig {
            message_queue_limit: config.backpressure.message_queue_limit,
            queued_count_limit: config.backpressure.queued_count_limit,
        },
        max_scan_ranks: config.max_scan_ranks,
        max_tick_attempts: config.max_tick_attempts,
        tick_interval: Duration::from_millis(config.tick_interval_ms),
        rpc_timeout: Duration::from_millis(config.rpc_timeout_ms),
        mailbox_capacity: config.backpressure.message_queue_limit,
    };

    let manager = Arc::new(PartitionManager::new(
        args.node_id.clone(),
        Arc::clone(&router),
        Arc::clone(&claims),
        publisher,
        worker_config,
        Duration::from_millis(args.rebalance_debounce_ms),
    ));

    let spec = PartitionSpec {
        rank_min: config.rank_min,
        rank_max: config.rank_max,
        partition_count: config.partition_count,
    };
    let now_ms = now_ms();
    let snapshot = compute(&nodes, spec, config.epoch, now_ms);
    router.update(&snapshot);
    manager.rebalance(&snapshot).await;
    info!(
        node_id = %args.node_id,
        shards = manager.running_count().await,
        epoch = config.epoch,
        "shard assignment applied"
    );

    let handler = Arc::new(RequestHandler::new(
        claims,
        router,
        config.epoch,
        Duration::from_millis(config.enqueue_timeout_ms),
    ));

    info!(path = %socket_path.display(), "rankmatchd starting");

    tokio::select! {
        result = run_hub(&socket_path, handler, matches_rx) => {
            result.context("edge hub exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
