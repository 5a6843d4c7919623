// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for the RankMatch edge hub: handshake, `add_request`,
//! match subscription, and match-notification messages, carried in
//! CBOR-encoded `OpEnvelope`s (ADR-style envelope, matching the reference
//! workspace's session hub protocol).

use serde::{Deserialize, Serialize};

/// Default Unix socket path for the matchmaking edge hub.
///
/// Prefers a per-user runtime dir (`XDG_RUNTIME_DIR`) and falls back to
/// `/tmp` when unavailable.
pub fn default_socket_path() -> std::path::PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("/tmp"))
        .join("rankmatch.sock")
}

/// Canonical envelope carried as the payload of every framed packet.
///
/// * `op` – operation name, mirrors the active [`Message`] variant.
/// * `ts` – logical timestamp (authoritative on the server side).
/// * `payload` – operation-specific body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpEnvelope<P> {
    /// Operation name (e.g. `"handshake"`, `"add_request"`).
    pub op: String,
    /// Logical timestamp (monotonic per-host clock).
    pub ts: u64,
    /// Operation-specific body.
    pub payload: P,
}

/// Handshake request payload (client -> hub).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakePayload {
    /// Optional client-supplied identifier, for logging only.
    pub agent_id: Option<String>,
    /// Implementation version (not wire version).
    pub client_version: u32,
}

/// Status enumeration for a handshake acknowledgement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AckStatus {
    /// Handshake succeeded.
    #[serde(rename = "OK")]
    Ok,
    /// Handshake failed.
    #[serde(rename = "ERROR")]
    Error,
}

/// Handshake acknowledgement payload (hub -> client).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeAckPayload {
    /// Status of the handshake.
    pub status: AckStatus,
    /// Server implementation version (not wire version).
    pub server_version: u32,
    /// Session identifier assigned to this connection.
    pub session_id: String,
}

/// A single matchmaking request (client -> hub).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddRequestPayload {
    /// Requesting user's stable identity.
    pub user_id: String,
    /// Requested rank.
    pub rank: i64,
}

/// Outcome of an `add_request` (hub -> client).
///
/// `ok=true, error=null` on acceptance, otherwise `ok=false` with one of
/// the canonical error strings the edge handler surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddResponsePayload {
    /// Whether the request was accepted.
    pub ok: bool,
    /// Error string when `ok` is false, `None` otherwise.
    pub error: Option<String>,
}

/// Subscribe to match notifications for a user (client -> hub).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeMatchesPayload {
    /// User whose matches the caller wants delivered on this connection.
    pub user_id: String,
}

/// One side of a finalized match, as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchedUser {
    /// The user's stable identity.
    pub user_id: String,
    /// The rank the user was matched at.
    pub rank: i64,
}

/// A finalized match notification (hub -> both participants' connections).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchNotificationPayload {
    /// The two matched users, order unspecified.
    pub users: [MatchedUser; 2],
}

/// Protocol or processing error (hub -> client).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Stable identifier, e.g. `"invalid_rank"`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
}

/// Wire message kinds carried inside [`OpEnvelope`] payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    /// Handshake request (op = `"handshake"`).
    Handshake(HandshakePayload),
    /// Handshake acknowledgement (op = `"handshake_ack"`).
    HandshakeAck(HandshakeAckPayload),
    /// Protocol or processing error (op = `"error"`).
    Error(ErrorPayload),
    /// Enqueue a matchmaking request (op = `"add_request"`).
    AddRequest(AddRequestPayload),
    /// Reply to an `add_request` (op = `"add_response"`).
    AddResponse(AddResponsePayload),
    /// Subscribe to match notifications (op = `"subscribe_matches"`).
    SubscribeMatches(SubscribeMatchesPayload),
    /// A finalized match (op = `"match_notification"`).
    MatchNotification(MatchNotificationPayload),
}

impl Message {
    /// Canonical op string for this message variant.
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self {
            Message::Handshake(_) => "handshake",
            Message::HandshakeAck(_) => "handshake_ack",
            Message::Error(_) => "error",
            Message::AddRequest(_) => "add_request",
            Message::AddResponse(_) => "add_response",
            Message::SubscribeMatches(_) => "subscribe_matches",
            Message::MatchNotification(_) => "match_notification",
        }
    }
}

pub mod wire;
