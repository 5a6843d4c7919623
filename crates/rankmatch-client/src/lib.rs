// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client helper for talking to the RankMatch edge hub.
//!
//! Connects over the Unix socket `rankmatch-edge::hub::run_hub` listens on
//! and speaks the length-prefixed CBOR framing in `rankmatch_proto::wire`.
//! A background task drains the socket and demultiplexes incoming frames:
//! `add_response` completes the oldest outstanding [`MatchClient::add_request`]
//! call, `match_notification` is forwarded to the channel
//! [`MatchClient::recv_match`] drains.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rankmatch_proto::wire::{decode_message, encode_message};
use rankmatch_proto::{
    AddRequestPayload, AddResponsePayload, HandshakePayload, Message, MatchNotificationPayload,
    SubscribeMatchesPayload,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};

/// One connection to the edge hub.
///
/// `add_request` calls are serialized internally — the wire protocol has no
/// request id, so only one can be outstanding per connection at a time; the
/// hub itself enforces at-most-one outstanding ticket per `user_id` across
/// the whole cluster regardless of how many connections a client opens.
pub struct MatchClient {
    write_half: Mutex<OwnedWriteHalf>,
    add_call: Mutex<()>,
    add_reply: Arc<Mutex<Option<oneshot::Sender<AddResponsePayload>>>>,
    matches_rx: Mutex<mpsc::UnboundedReceiver<MatchNotificationPayload>>,
}

impl MatchClient {
    /// Connect to the edge hub at `socket_path` and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be connected to or the
    /// handshake cannot be written.
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = socket_path.as_ref();
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("connect {}", socket_path.display()))?;
        let (read_half, write_half) = stream.into_split();

        let (matches_tx, matches_rx) = mpsc::unbounded_channel();
        let add_reply: Arc<Mutex<Option<oneshot::Sender<AddResponsePayload>>>> =
            Arc::new(Mutex::new(None));

        tokio::spawn(read_loop(read_half, Arc::clone(&add_reply), matches_tx));

        let client = Self {
            write_half: Mutex::new(write_half),
            add_call: Mutex::new(()),
            add_reply,
            matches_rx: Mutex::new(matches_rx),
        };

        client
            .send(Message::Handshake(HandshakePayload {
                agent_id: None,
                client_version: 1,
            }))
            .await?;

        Ok(client)
    }

    async fn send(&self, msg: Message) -> Result<()> {
        let packet = encode_message(msg, 0).context("encode message")?;
        let mut w = self.write_half.lock().await;
        w.write_all(&packet).await.context("write to edge hub")
    }

    /// Submit a matchmaking request and await the hub's `add_response`.
    ///
    /// `Ok(())` once accepted (queued or immediately matched), `Err`
    /// carrying the hub's error string otherwise (`already_queued`,
    /// `overloaded`, …).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection closes before a reply arrives, or
    /// if the hub rejects the request.
    pub async fn add_request(&self, user_id: &str, rank: i64) -> Result<()> {
        let _serialize = self.add_call.lock().await;
        let (tx, rx) = oneshot::channel();
        *self.add_reply.lock().await = Some(tx);
        self.send(Message::AddRequest(AddRequestPayload {
            user_id: user_id.to_string(),
            rank,
        }))
        .await?;
        let AddResponsePayload { ok, error } = rx
            .await
            .map_err(|_| anyhow!("connection closed before add_response"))?;
        if ok {
            Ok(())
        } else {
            Err(anyhow!(error.unwrap_or_else(|| "unknown error".into())))
        }
    }

    /// Subscribe this connection to match notifications for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    pub async fn subscribe_matches(&self, user_id: &str) -> Result<()> {
        self.send(Message::SubscribeMatches(SubscribeMatchesPayload {
            user_id: user_id.to_string(),
        }))
        .await
    }

    /// Await the next match notification delivered to this connection.
    /// Returns `None` once the hub closes the connection.
    pub async fn recv_match(&self) -> Option<MatchNotificationPayload> {
        self.matches_rx.lock().await.recv().await
    }
}

async fn read_loop(
    mut read_half: tokio::net::unix::OwnedReadHalf,
    add_reply: Arc<Mutex<Option<oneshot::Sender<AddResponsePayload>>>>,
    matches_tx: mpsc::UnboundedSender<MatchNotificationPayload>,
) {
    let mut acc: Vec<u8> = Vec::with_capacity(4 * 1024);
    let mut buf = [0u8; 4 * 1024];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        acc.extend_from_slice(&buf[..n]);

        loop {
            match decode_message(&acc) {
                Ok((msg, _ts, used)) => {
                    acc.drain(..used);
                    match msg {
                        Message::AddResponse(payload) => {
                            if let Some(tx) = add_reply.lock().await.take() {
                                let _ = tx.send(payload);
                            }
                        }
                        Message::MatchNotification(payload) => {
                            let _ = matches_tx.send(payload);
                        }
                        Message::Handshake(_)
                        | Message::HandshakeAck(_)
                        | Message::Error(_)
                        | Message::AddRequest(_)
                        | Message::SubscribeMatches(_) => {}
                    }
                }
                Err(_) => break,
            }
        }
    }
}
