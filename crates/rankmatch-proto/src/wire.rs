// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CBOR framing helpers for session messages.

use crate::{Message, OpEnvelope};
use thiserror::Error;

/// Errors raised while encoding or decoding a framed packet.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer does not yet contain a complete length prefix.
    #[error("incomplete length prefix")]
    IncompleteLength,
    /// The buffer's length prefix names more bytes than are present.
    #[error("incomplete frame")]
    IncompleteFrame,
    /// CBOR serialization failed.
    #[error("cbor encode error: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// CBOR deserialization failed.
    #[error("cbor decode error: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

/// Encode a message into a length-prefixed CBOR packet: a 4-byte
/// big-endian length followed by the CBOR-encoded [`OpEnvelope`].
pub fn encode_message(msg: Message, ts: u64) -> Result<Vec<u8>, WireError> {
    let envelope = OpEnvelope {
        op: msg.op_name().to_string(),
        ts,
        payload: msg,
    };
    let mut body = Vec::new();
    ciborium::ser::into_writer(&envelope, &mut body)?;
    let mut out = Vec::with_capacity(4 + body.len());
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a packet from the provided buffer, returning the message, its
/// logical timestamp, and the number of bytes consumed.
pub fn decode_message(stream: &[u8]) -> Result<(Message, u64, usize), WireError> {
    if stream.len() < 4 {
        return Err(WireError::IncompleteLength);
    }
    let len = u32::from_be_bytes([stream[0], stream[1], stream[2], stream[3]]) as usize;
    if stream.len() < 4 + len {
        return Err(WireError::IncompleteFrame);
    }
    let envelope: OpEnvelope<Message> = ciborium::de::from_reader(&stream[4..4 + len])?;
    Ok((envelope.payload, envelope.ts, 4 + len))
}
