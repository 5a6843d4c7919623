// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pure matchmaking primitives shared by every partition worker: the
//! ranked queue state, the age-driven widening function, the
//! closest-opponent search, and the backpressure predicate.
//!
//! Nothing in this crate is async or concurrent on its own — every type
//! here is a plain value manipulated by its single owning actor (see
//! `rankmatch-worker`). Concurrency safety is an ownership property, not a
//! locking one.

pub mod backpressure;
pub mod queue;
pub mod search;
pub mod ticket;
pub mod widening;

pub use backpressure::{check_overload, BackpressureConfig, Overload};
pub use queue::{HeadMismatch, QueueState};
pub use search::{is_better, peek_best_opponent, sort_key, take_best_opponent, Candidate};
pub use ticket::Ticket;
pub use widening::{allowed_diff, WideningConfig};
