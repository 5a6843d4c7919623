// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Edge surface for RankMatch: `add_request`/`subscribe_matches` request
//! handling and the Unix-socket CBOR hub that carries them.

pub mod handler;
pub mod hub;

pub use handler::{RequestError, RequestHandler};
pub use hub::{hub_publisher, run_hub, HubPublisher};
