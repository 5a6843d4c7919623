// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Configuration service and schema for the RankMatch server.
//! Keeps storage adapters thin and the schema framework-agnostic.

pub mod config;
pub mod match_config;

pub use config::{ConfigError, ConfigService, ConfigStore};
pub use match_config::{BackpressureSettings, MatchConfig};
