// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The partition worker actor: owns one [`QueueState`] exclusively and
//! serializes every enqueue, RPC, and tick through its own mailbox.

use std::sync::Arc;
use std::time::Duration;

use rankmatch_core::{
    allowed_diff, check_overload, peek_best_opponent, sort_key, take_best_opponent,
    BackpressureConfig, QueueState, Ticket, WideningConfig,
};
use rankmatch_claim::ClaimIndex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::handle::{
    EnqueueError, EnqueueEnvelope, EnqueueOutcome, EpochMismatch, HealthReport, PeekOutcome,
    ReserveOutcome, WorkerHandle, WorkerMsg,
};
use crate::neighbors::NeighborLookup;
use crate::publisher::MatchPublisher;

/// Every tunable the tick and admission-control logic need, in one value.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Rank tolerance checked on enqueue's immediate-match fast path.
    pub immediate_match_allowed_diff: u64,
    /// Age → tolerated-rank-diff step function used by the tick.
    pub widening: WideningConfig,
    /// Mailbox-depth / queue-size overload thresholds.
    pub backpressure: BackpressureConfig,
    /// Upper bound on distinct ranks inspected per search.
    pub max_scan_ranks: usize,
    /// Upper bound on matches attempted per tick.
    pub max_tick_attempts: usize,
    /// Cadence of the periodic widening tick.
    pub tick_interval: Duration,
    /// Deadline for cross-shard `peek_nearest`/`reserve` calls.
    pub rpc_timeout: Duration,
    /// Mailbox capacity for this worker's inbox.
    pub mailbox_capacity: usize,
}

/// Spawn a partition worker as a tokio task and return a handle to it.
///
/// The returned `JoinHandle` resolves once every clone of the `WorkerHandle`
/// has been dropped (mailbox closed) and the actor's message loop exits.
pub fn spawn(
    shard_id: impl Into<String>,
    range_start: i64,
    range_end: i64,
    epoch: u64,
    config: WorkerConfig,
    clock: Clock,
    claims: Arc<ClaimIndex>,
    publisher: Arc<dyn MatchPublisher>,
    neighbors: Arc<dyn NeighborLookup>,
) -> (WorkerHandle, tokio::task::JoinHandle<()>) {
    let shard_id = shard_id.into();
    let (tx, rx) = mpsc::channel(config.mailbox_capacity);
    let handle = WorkerHandle {
        epoch,
        shard_id: shard_id.clone(),
        range_start,
        range_end,
        tx,
    };
    let state = QueueState::new(shard_id, range_start, range_end, epoch);
    let join = tokio::spawn(run(
        state, rx, epoch, config, clock, claims, publisher, neighbors,
    ));
    (handle, join)
}

#[allow(clippy::too_many_arguments)]
async fn run(
    mut state: QueueState,
    mut rx: mpsc::Receiver<WorkerMsg>,
    epoch: u64,
    config: WorkerConfig,
    clock: Clock,
    claims: Arc<ClaimIndex>,
    publisher: Arc<dyn MatchPublisher>,
    neighbors: Arc<dyn NeighborLookup>,
) {
    info!(
        epoch,
        shard_id = %state.shard_id,
        range_start = state.range_start,
        range_end = state.range_end,
        "partition worker started"
    );
    let started_at = clock.now_ms();

    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(msg) => {
                        let mailbox_depth = rx.len() + 1; // +1 for the message just pulled
                        let uptime_ms = clock.now_ms().saturating_sub(started_at);
                        handle_message(&mut state, msg, mailbox_depth, uptime_ms, epoch, &config, &clock, &claims, &publisher);
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                run_tick(&mut state, epoch, &config, &clock, &claims, &publisher, neighbors.as_ref()).await;
            }
        }
    }

    info!(epoch, shard_id = %state.shard_id, "partition worker stopped");
}

#[allow(clippy::too_many_arguments)]
fn handle_message(
    state: &mut QueueState,
    msg: WorkerMsg,
    mailbox_depth: usize,
    uptime_ms: u64,
    epoch: u64,
    config: &WorkerConfig,
    clock: &Clock,
    claims: &ClaimIndex,
    publisher: &dyn MatchPublisher,
) {
    match msg {
        WorkerMsg::Enqueue { envelope, reply } => {
            let outcome = handle_enqueue(
                state,
                envelope,
                mailbox_depth,
                epoch,
                config,
                clock,
                claims,
                publisher,
            );
            let _ = reply.send(outcome);
        }
        WorkerMsg::PeekNearest {
            rank,
            allowed_diff: diff,
            exclude_user_id,
            epoch: caller_epoch,
            reply,
        } => {
            let outcome = if caller_epoch != epoch {
                Err(EpochMismatch::EpochMismatch)
            } else {
                Ok(
                    match peek_best_opponent(state, rank, diff, &exclude_user_id, config.max_scan_ranks)
                    {
                        Some(candidate) => PeekOutcome::Found(candidate.ticket),
                        None => PeekOutcome::None,
                    },
                )
            };
            let _ = reply.send(outcome);
        }
        WorkerMsg::Reserve {
            user_id,
            rank,
            enqueued_at_ms,
            epoch: caller_epoch,
            reply,
        } => {
            let outcome = if caller_epoch != epoch {
                Err(EpochMismatch::EpochMismatch)
            } else {
                let expected = Ticket {
                    user_id,
                    rank,
                    enqueued_at_monotonic_ms: enqueued_at_ms,
                };
                Ok(match state.dequeue_head_if_matches(rank, &expected) {
                    Ok(ticket) => ReserveOutcome::Reserved(ticket),
                    Err(_) => ReserveOutcome::NotFound,
                })
            };
            let _ = reply.send(outcome);
        }
        WorkerMsg::HealthCheck { reply } => {
            let _ = reply.send(HealthReport {
                queued_count: state.queued_count(),
                uptime_ms,
            });
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_enqueue(
    state: &mut QueueState,
    envelope: EnqueueEnvelope,
    mailbox_depth: usize,
    epoch: u64,
    config: &WorkerConfig,
    clock: &Clock,
    claims: &ClaimIndex,
    publisher: &dyn MatchPublisher,
) -> Result<EnqueueOutcome, EnqueueError> {
    if envelope.epoch != epoch {
        return Err(EnqueueError::StaleEpoch);
    }
    check_overload(mailbox_depth, state.queued_count(), &config.backpressure)
        .map_err(|_| EnqueueError::Overloaded)?;
    if !state.in_range(envelope.rank) {
        return Err(EnqueueError::OutOfRange);
    }

    let ticket = Ticket::new(envelope.user_id, envelope.rank, clock.now_ms());

    if let Some(candidate) = peek_best_opponent(
        state,
        ticket.rank,
        config.immediate_match_allowed_diff,
        &ticket.user_id,
        config.max_scan_ranks,
    ) {
        match take_best_opponent(state, &candidate.ticket) {
            Ok(opponent) => {
                finalize_match(claims, publisher, ticket, opponent);
                return Ok(EnqueueOutcome::Accepted);
            }
            Err(_) => {
                // Another path (concurrent tick) claimed that head first;
                // fall through and queue normally.
            }
        }
    }

    state.enqueue(ticket);
    Ok(EnqueueOutcome::Accepted)
}

fn finalize_match(claims: &ClaimIndex, publisher: &dyn MatchPublisher, a: Ticket, b: Ticket) {
    claims.release(&a.user_id);
    claims.release(&b.user_id);
    info!(user_a = %a.user_id, user_b = %b.user_id, "match finalized");
    publisher.publish_match(&a, &b);
}

enum Source {
    Local,
    Remote(WorkerHandle),
}

struct TickCandidate {
    requester: Ticket,
    opponent: Ticket,
    source: Source,
}

async fn run_tick(
    state: &mut QueueState,
    epoch: u64,
    config: &WorkerConfig,
    clock: &Clock,
    claims: &ClaimIndex,
    publisher: &dyn MatchPublisher,
    neighbors: &dyn NeighborLookup,
) {
    let mut matches_made = 0usize;
    for _ in 0..config.max_tick_attempts {
        let Some(TickCandidate {
            requester,
            opponent,
            source,
        }) = find_globally_best_pair(state, config, clock, neighbors, epoch).await
        else {
            break;
        };

        let Ok(removed_requester) = state.dequeue_head_if_matches(requester.rank, &requester)
        else {
            // Lost the race to another path; try again with fresh state.
            continue;
        };

        match source {
            Source::Local => match take_best_opponent(state, &opponent) {
                Ok(removed_opponent) => {
                    finalize_match(claims, publisher, removed_requester, removed_opponent);
                    matches_made += 1;
                }
                Err(_) => state.enqueue_front(removed_requester),
            },
            Source::Remote(worker) => {
                let reply = crate::handle::reserve(
                    &worker,
                    &opponent.user_id,
                    opponent.rank,
                    opponent.enqueued_at_monotonic_ms,
                    epoch,
                    config.rpc_timeout,
                )
                .await;
                match reply {
                    Ok(Ok(ReserveOutcome::Reserved(removed_opponent))) => {
                        finalize_match(claims, publisher, removed_requester, removed_opponent);
                        matches_made += 1;
                    }
                    Ok(Ok(ReserveOutcome::NotFound)) | Ok(Err(_)) => {
                        state.enqueue_front(removed_requester);
                    }
                    Err(failure) => {
                        warn!(?failure, shard = worker.shard_id, "dropped reserve candidate");
                        state.enqueue_front(removed_requester);
                    }
                }
            }
        }
    }
    debug!(
        shard_id = %state.shard_id,
        attempts = config.max_tick_attempts,
        matches_made,
        "tick complete"
    );
}

async fn find_globally_best_pair(
    state: &QueueState,
    config: &WorkerConfig,
    clock: &Clock,
    neighbors: &dyn NeighborLookup,
    epoch: u64,
) -> Option<TickCandidate> {
    let now = clock.now_ms();
    let ranks: Vec<i64> = state.non_empty_ranks().collect();
    let mut best: Option<TickCandidate> = None;

    for rank in ranks {
        let Some(requester) = state.peek_head(rank).cloned() else {
            continue;
        };
        let allowed = allowed_diff(requester.age_ms(now), &config.widening);

        if let Some(local) = peek_best_opponent(
            state,
            requester.rank,
            allowed,
            &requester.user_id,
            config.max_scan_ranks,
        ) {
            consider(
                &mut best,
                TickCandidate {
                    requester: requester.clone(),
                    opponent: local.ticket,
                    source: Source::Local,
                },
            );
        }

        #[allow(clippy::cast_possible_wrap)]
        let allowed_i64 = allowed as i64;

        if requester.rank - allowed_i64 < state.range_start {
            if let Some(left) = neighbors.left(epoch, &state.shard_id) {
                if let Ok(Ok(PeekOutcome::Found(opponent))) = crate::handle::peek_nearest(
                    &left,
                    requester.rank,
                    allowed,
                    &requester.user_id,
                    epoch,
                    config.rpc_timeout,
                )
                .await
                {
                    consider(
                        &mut best,
                        TickCandidate {
                            requester: requester.clone(),
                            opponent,
                            source: Source::Remote(left),
                        },
                    );
                }
            }
        }

        if requester.rank + allowed_i64 > state.range_end {
            if let Some(right) = neighbors.right(epoch, &state.shard_id) {
                if let Ok(Ok(PeekOutcome::Found(opponent))) = crate::handle::peek_nearest(
                    &right,
                    requester.rank,
                    allowed,
                    &requester.user_id,
                    epoch,
                    config.rpc_timeout,
                )
                .await
                {
                    consider(
                        &mut best,
                        TickCandidate {
                            requester,
                            opponent,
                            source: Source::Remote(right),
                        },
                    );
                }
            }
        }
    }

    best
}

fn consider(best: &mut Option<TickCandidate>, candidate: TickCandidate) {
    let better = match best {
        None => true,
        Some(current) => {
            sort_key(candidate.requester.rank, &candidate.opponent)
                < sort_key(current.requester.rank, &current.opponent)
        }
    };
    if better {
        *best = Some(candidate);
    }
}
