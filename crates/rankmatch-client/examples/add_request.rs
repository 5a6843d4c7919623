// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Submit a single matchmaking request against a running `rankmatchd` and
//! print the match notification once the hub pairs the ticket.
//!
//! ```text
//! cargo run -p rankmatch-client --example add_request -- alice 1200
//! ```

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use rankmatch_client::MatchClient;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let user_id = args
        .next()
        .context("usage: add_request <user_id> <rank> [socket_path]")?;
    if user_id.is_empty() {
        bail!("user_id must not be empty");
    }
    let rank: i64 = args
        .next()
        .context("usage: add_request <user_id> <rank> [socket_path]")?
        .parse()
        .context("rank must be an integer")?;
    let socket_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(rankmatch_proto::default_socket_path);

    let client = MatchClient::connect(&socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;
    client.subscribe_matches(&user_id).await?;
    client.add_request(&user_id, rank).await?;
    println!("queued {user_id} at rank {rank}, waiting for a match...");

    match client.recv_match().await {
        Some(notification) => {
            println!("matched: {:?}", notification.users);
        }
        None => println!("hub closed the connection before a match arrived"),
    }

    Ok(())
}
