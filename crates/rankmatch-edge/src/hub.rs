// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Unix-socket CBOR hub: the client-facing front door for `add_request`
//! and `subscribe_matches`, and the fan-out point for finalized matches.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rankmatch_core::Ticket;
use rankmatch_proto::wire::{decode_message, encode_message};
use rankmatch_proto::{
    AckStatus, AddRequestPayload, AddResponsePayload, ErrorPayload, HandshakeAckPayload,
    HandshakePayload, Message, MatchNotificationPayload, MatchedUser, SubscribeMatchesPayload,
};
use rankmatch_worker::MatchPublisher;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::handler::RequestHandler;

struct ConnState {
    tx: mpsc::Sender<Vec<u8>>,
    subscribed_user: Option<String>,
}

#[derive(Default)]
struct HubState {
    next_conn_id: u64,
    next_ts: u64,
    conns: HashMap<u64, ConnState>,
    subscribers_by_user: HashMap<String, HashSet<u64>>,
}

impl HubState {
    fn alloc_ts(&mut self) -> u64 {
        let t = self.next_ts;
        self.next_ts += 1;
        t
    }
}

/// [`MatchPublisher`] adapter that forwards finalized matches to the hub's
/// fan-out task over an unbounded channel. Never blocks the worker thread.
pub struct HubPublisher {
    tx: mpsc::UnboundedSender<(Ticket, Ticket)>,
}

impl MatchPublisher for HubPublisher {
    fn publish_match(&self, a: &Ticket, b: &Ticket) {
        let _ = self.tx.send((a.clone(), b.clone()));
    }
}

/// Construct a [`HubPublisher`] and the receiver [`run_hub`] drains to fan
/// matches out to subscribed connections.
#[must_use]
pub fn hub_publisher() -> (Arc<HubPublisher>, mpsc::UnboundedReceiver<(Ticket, Ticket)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(HubPublisher { tx }), rx)
}

/// Run the edge hub until the listener errors. Binds a Unix socket at
/// `socket_path`, accepts client connections, and drains `matches` to
/// notify subscribers of every finalized match.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound.
pub async fn run_hub(
    socket_path: impl AsRef<Path>,
    handler: Arc<RequestHandler>,
    matches: mpsc::UnboundedReceiver<(Ticket, Ticket)>,
) -> Result<()> {
    let socket_path = socket_path.as_ref();
    let hub = Arc::new(Mutex::new(HubState::default()));

    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "edge hub listening");

    tokio::spawn(fan_out_matches(Arc::clone(&hub), matches));

    loop {
        let (stream, _) = listener.accept().await?;
        let hub_state = Arc::clone(&hub);
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            if let Err(err) = handle_client(stream, hub_state, handler).await {
                warn!(?err, "client handler error");
            }
        });
    }
}

async fn fan_out_matches(hub: Arc<Mutex<HubState>>, mut matches: mpsc::UnboundedReceiver<(Ticket, Ticket)>) {
    while let Some((a, b)) = matches.recv().await {
        let payload = MatchNotificationPayload {
            users: [
                MatchedUser {
                    user_id: a.user_id.clone(),
                    rank: a.rank,
                },
                MatchedUser {
                    user_id: b.user_id.clone(),
                    rank: b.rank,
                },
            ],
        };
        let mut h = hub.lock().await;
        let ts = h.alloc_ts();
        let Ok(packet) = encode_message(Message::MatchNotification(payload), ts) else {
            continue;
        };
        let mut targets = HashSet::new();
        if let Some(conns) = h.subscribers_by_user.get(&a.user_id) {
            targets.extend(conns.iter().copied());
        }
        if let Some(conns) = h.subscribers_by_user.get(&b.user_id) {
            targets.extend(conns.iter().copied());
        }
        for conn_id in targets {
            if let Some(conn) = h.conns.get(&conn_id) {
                let _ = conn.tx.send(packet.clone()).await;
            }
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    hub: Arc<Mutex<HubState>>,
    handler: Arc<RequestHandler>,
) -> Result<()> {
    let (mut reader, writer) = tokio::io::split(stream);

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
    let conn_id = {
        let mut h = hub.lock().await;
        let id = h.next_conn_id;
        h.next_conn_id += 1;
        h.conns.insert(
            id,
            ConnState {
                tx,
                subscribed_user: None,
            },
        );
        id
    };

    tokio::spawn(async move {
        let mut ws = writer;
        while let Some(buf) = rx.recv().await {
            if ws.write_all(&buf).await.is_err() {
                break;
            }
        }
    });

    const MAX_PAYLOAD: usize = 1024 * 1024;
    let mut read_buf = vec![0u8; 16 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(32 * 1024);
    loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            break;
        }
        acc.extend_from_slice(&read_buf[..n]);

        loop {
            if acc.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes([acc[0], acc[1], acc[2], acc[3]]) as usize;
            if len > MAX_PAYLOAD {
                warn!(conn_id, "payload too large");
                return Ok(());
            }
            let frame_len = 4 + len;
            if acc.len() < frame_len {
                break;
            }
            let packet: Vec<u8> = acc.drain(..frame_len).collect();
            match decode_message(&packet) {
                Ok((msg, _ts, _used)) => {
                    if let Err(err) = handle_message(msg, conn_id, &hub, &handler).await {
                        warn!(?err, conn_id, "dropping connection");
                        return Ok(());
                    }
                }
                Err(err) => {
                    warn!(?err, "failed to decode packet");
                    return Ok(());
                }
            }
        }
    }

    let mut h = hub.lock().await;
    if let Some(conn) = h.conns.remove(&conn_id) {
        if let Some(user_id) = conn.subscribed_user {
            if let Some(set) = h.subscribers_by_user.get_mut(&user_id) {
                set.remove(&conn_id);
            }
        }
    }

    Ok(())
}

async fn handle_message(
    msg: Message,
    conn_id: u64,
    hub: &Arc<Mutex<HubState>>,
    handler: &Arc<RequestHandler>,
) -> Result<()> {
    match msg {
        Message::Handshake(HandshakePayload { client_version, .. }) => {
            let mut h = hub.lock().await;
            let ts = h.alloc_ts();
            let ack = Message::HandshakeAck(HandshakeAckPayload {
                status: AckStatus::Ok,
                server_version: client_version,
                session_id: conn_id.to_string(),
            });
            if let Some(conn) = h.conns.get(&conn_id) {
                let pkt = encode_message(ack, ts)?;
                let _ = conn.tx.send(pkt).await;
            }
        }
        Message::AddRequest(AddRequestPayload { user_id, rank }) => {
            let result = handler.add_request(&user_id, rank).await;
            let payload = match result {
                Ok(()) => AddResponsePayload {
                    ok: true,
                    error: None,
                },
                Err(err) => AddResponsePayload {
                    ok: false,
                    error: Some(err.to_string()),
                },
            };
            let mut h = hub.lock().await;
            let ts = h.alloc_ts();
            if let Some(conn) = h.conns.get(&conn_id) {
                let pkt = encode_message(Message::AddResponse(payload), ts)?;
                let _ = conn.tx.send(pkt).await;
            }
        }
        Message::SubscribeMatches(SubscribeMatchesPayload { user_id }) => {
            let mut h = hub.lock().await;
            if let Some(conn) = h.conns.get_mut(&conn_id) {
                conn.subscribed_user = Some(user_id.clone());
            }
            h.subscribers_by_user
                .entry(user_id)
                .or_default()
                .insert(conn_id);
        }
        Message::HandshakeAck(_) | Message::AddResponse(_) | Message::MatchNotification(_) => {
            // Server-originated only; ignore if a client sends one.
        }
        Message::Error(ErrorPayload { name, message }) => {
            warn!(conn_id, %name, %message, "client reported error");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankmatch_claim::ClaimIndex;
    use rankmatch_cluster::{compute, PartitionSpec, Router};
    use rankmatch_worker::{Clock, NoNeighbors, WorkerConfig};
    use std::time::Duration;
    use tokio::time::timeout;

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            immediate_match_allowed_diff: 100,
            widening: rankmatch_core::WideningConfig {
                step_ms: 200,
                step_diff: 25,
                cap: 1_000,
            },
            backpressure: rankmatch_core::BackpressureConfig {
                message_queue_limit: 1_000,
                queued_count_limit: 10_000,
            },
            max_scan_ranks: 64,
            max_tick_attempts: 8,
            tick_interval: Duration::from_millis(250),
            rpc_timeout: Duration::from_millis(200),
            mailbox_capacity: 64,
        }
    }

    async fn handler_with_one_worker(
        hub: &Arc<Mutex<HubState>>,
    ) -> (Arc<RequestHandler>, Arc<HubPublisher>) {
        let router = Arc::new(Router::new());
        let claims = Arc::new(ClaimIndex::new(4));
        let snapshot = compute(
            &["n1".to_string()],
            PartitionSpec {
                rank_min: 0,
                rank_max: 2_999,
                partition_count: 1,
            },
            1,
            0,
        );
        router.update(&snapshot);
        let (publisher, matches_rx) = hub_publisher();
        let assignment = &snapshot.assignments[0];
        let (handle, _join) = rankmatch_worker::spawn(
            assignment.shard_id.clone(),
            assignment.range_start,
            assignment.range_end,
            1,
            worker_config(),
            Clock::new(),
            Arc::clone(&claims),
            publisher.clone() as Arc<dyn MatchPublisher>,
            Arc::new(NoNeighbors),
        );
        router.register_worker(1, assignment.shard_id.clone(), handle);
        let handler = Arc::new(RequestHandler::new(
            claims,
            router,
            1,
            Duration::from_millis(500),
        ));
        tokio::spawn(fan_out_matches(Arc::clone(hub), matches_rx));
        (handler, publisher)
    }

    async fn add_conn(hub: &Arc<Mutex<HubState>>) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        let mut h = hub.lock().await;
        let id = h.next_conn_id;
        h.next_conn_id += 1;
        h.conns.insert(
            id,
            ConnState {
                tx,
                subscribed_user: None,
            },
        );
        (id, rx)
    }

    #[tokio::test]
    async fn handshake_replies_with_ack() {
        let hub = Arc::new(Mutex::new(HubState::default()));
        let (handler, _publisher) = handler_with_one_worker(&hub).await;
        let (conn_id, mut rx) = add_conn(&hub).await;

        handle_message(
            Message::Handshake(HandshakePayload {
                agent_id: None,
                client_version: 7,
            }),
            conn_id,
            &hub,
            &handler,
        )
        .await
        .unwrap();

        let pkt = timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
            .expect("handshake ack");
        let (msg, _ts, _) = decode_message(&pkt).unwrap();
        assert!(matches!(
            msg,
            Message::HandshakeAck(HandshakeAckPayload {
                server_version: 7,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn add_request_accepts_then_reports_already_queued() {
        let hub = Arc::new(Mutex::new(HubState::default()));
        let (handler, _publisher) = handler_with_one_worker(&hub).await;
        let (conn_id, mut rx) = add_conn(&hub).await;

        handle_message(
            Message::AddRequest(AddRequestPayload {
                user_id: "u1".into(),
                rank: 1_500,
            }),
            conn_id,
            &hub,
            &handler,
        )
        .await
        .unwrap();
        let (msg, ..) = decode_message(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            msg,
            Message::AddResponse(AddResponsePayload {
                ok: true,
                error: None
            })
        );

        handle_message(
            Message::AddRequest(AddRequestPayload {
                user_id: "u1".into(),
                rank: 1_600,
            }),
            conn_id,
            &hub,
            &handler,
        )
        .await
        .unwrap();
        let (msg, ..) = decode_message(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            msg,
            Message::AddResponse(AddResponsePayload {
                ok: false,
                error: Some("already_queued".to_string())
            })
        );
    }

    #[tokio::test]
    async fn both_participants_are_notified_of_a_match() {
        let hub = Arc::new(Mutex::new(HubState::default()));
        let (handler, publisher) = handler_with_one_worker(&hub).await;

        let (conn_a, mut rx_a) = add_conn(&hub).await;
        let (conn_b, mut rx_b) = add_conn(&hub).await;
        handle_message(
            Message::SubscribeMatches(SubscribeMatchesPayload {
                user_id: "u1".into(),
            }),
            conn_a,
            &hub,
            &handler,
        )
        .await
        .unwrap();
        handle_message(
            Message::SubscribeMatches(SubscribeMatchesPayload {
                user_id: "u2".into(),
            }),
            conn_b,
            &hub,
            &handler,
        )
        .await
        .unwrap();

        let a = Ticket::new("u1".to_string(), 1_500, 0);
        let b = Ticket::new("u2".to_string(), 1_500, 0);
        publisher.publish_match(&a, &b);

        let pkt_a = timeout(Duration::from_secs(1), rx_a.recv())
            .await
            .ok()
            .flatten()
            .expect("u1's connection should be notified");
        let pkt_b = timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .ok()
            .flatten()
            .expect("u2's connection should be notified");

        let (msg_a, ..) = decode_message(&pkt_a).unwrap();
        let Message::MatchNotification(MatchNotificationPayload { users }) = msg_a else {
            panic!("expected a match notification for u1's connection");
        };
        let names: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
        assert!(names.contains(&"u1"));
        assert!(names.contains(&"u2"));

        let (msg_b, ..) = decode_message(&pkt_b).unwrap();
        let Message::MatchNotification(MatchNotificationPayload { users }) = msg_b else {
            panic!("expected a match notification for u2's connection");
        };
        let names: Vec<&str> = users.iter().map(|u| u.user_id.as_str()).collect();
        assert!(names.contains(&"u1"));
        assert!(names.contains(&"u2"));
    }
}
