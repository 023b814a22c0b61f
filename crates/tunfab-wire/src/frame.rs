//! Frame types and the text codec.
//!
//! Decode failures are non-fatal by contract: callers log the error and drop
//! the message, the connection stays alive.

use thiserror::Error;

/// Maximum raw packet size relayed through the fabric (interface MTU).
pub const MAX_PACKET_SIZE: usize = 1500;

/// Errors from decoding a wire frame.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown message tag: {0:?}")]
    UnknownTag(String),
    #[error("missing field in `{0}` message")]
    MissingField(&'static str),
    #[error("empty payload in `{0}` message")]
    EmptyPayload(&'static str),
    #[error("invalid hex payload: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("packet too large: {size} bytes (max {MAX_PACKET_SIZE})")]
    PacketTooLarge { size: usize },
}

/// A single message on the agent↔hub channel.
///
/// Virtual addresses are opaque strings — dotted-quad IPv4 by convention,
/// but the codec does not validate them against any subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Agent → hub: bind the sender's virtual address to this connection.
    Register { addr: String },
    /// Hub → agent: registration acknowledgement. Informational only; the
    /// agent never waits for it.
    Registered { addr: String },
    /// Agent → hub: deliver `payload` to the connection registered as `dest`.
    Tx { dest: String, payload: Vec<u8> },
    /// Hub → agent: a packet addressed to this connection.
    Rx { payload: Vec<u8> },
}

impl Frame {
    /// Encode this frame as one channel message.
    pub fn encode(&self) -> String {
        match self {
            Frame::Register { addr } => format!("register:{addr}"),
            Frame::Registered { addr } => format!("registered:{addr}"),
            Frame::Tx { dest, payload } => format!("tx:{dest}:{}", hex::encode(payload)),
            Frame::Rx { payload } => format!("rx:{}", hex::encode(payload)),
        }
    }

    /// Decode one channel message into a frame.
    pub fn decode(text: &str) -> Result<Frame, WireError> {
        let Some((tag, rest)) = text.split_once(':') else {
            return Err(WireError::UnknownTag(text.to_string()));
        };
        match tag {
            "register" => Ok(Frame::Register {
                addr: rest.to_string(),
            }),
            "registered" => Ok(Frame::Registered {
                addr: rest.to_string(),
            }),
            "tx" => {
                let (dest, payload) = rest.split_once(':').ok_or(WireError::MissingField("tx"))?;
                Ok(Frame::Tx {
                    dest: dest.to_string(),
                    payload: decode_payload("tx", payload)?,
                })
            }
            "rx" => Ok(Frame::Rx {
                payload: decode_payload("rx", rest)?,
            }),
            other => Err(WireError::UnknownTag(other.to_string())),
        }
    }
}

/// Decode a hex payload field, rejecting empty and oversize payloads.
fn decode_payload(kind: &'static str, payload: &str) -> Result<Vec<u8>, WireError> {
    if payload.is_empty() {
        return Err(WireError::EmptyPayload(kind));
    }
    if payload.len() > MAX_PACKET_SIZE * 2 {
        return Err(WireError::PacketTooLarge {
            size: payload.len() / 2,
        });
    }
    Ok(hex::decode(payload)?)
}
