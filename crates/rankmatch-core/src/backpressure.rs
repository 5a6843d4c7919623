// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Admission-control predicate, checked first on every enqueue so an
//! overloaded shard sheds load before doing any other work.

use serde::{Deserialize, Serialize};

/// Thresholds that define "overloaded" for a single shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureConfig {
    /// Mailbox-depth threshold; exceeding it sheds load regardless of queue size.
    pub message_queue_limit: usize,
    /// Per-shard queued-ticket threshold.
    pub queued_count_limit: usize,
}

/// The shard is over a configured threshold and must reject new enqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("shard overloaded")]
pub struct Overload;

/// Check whether a shard with the given mailbox depth and queue size is
/// overloaded.
///
/// # Errors
///
/// Returns [`Overload`] when `mailbox_depth > message_queue_limit` or
/// `queued_count > queued_count_limit`.
pub fn check_overload(
    mailbox_depth: usize,
    queued_count: usize,
    config: &BackpressureConfig,
) -> Result<(), Overload> {
    if mailbox_depth > config.message_queue_limit || queued_count > config.queued_count_limit {
        Err(Overload)
    } else {
        Ok(())
    }
}
