#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Discovery v4 wire protocol: <https://github.com/ethereum/devp2p/blob/master/discv4.md>
//!
//! Only the packet formats live here; the per-peer ping/pong state machine
//! that uses them is part of the client crate.

mod proto;
pub use proto::{
    DiscMessage, Endpoint, FindNodeMessage, NeighboursMessage, Packet, PingMessage, PongMessage,
};

/// The maximum size of any discovery packet is 1280 bytes.
pub const MAX_PACKET_SIZE: usize = 1280;

/// Length of the packet-header: Hash + Signature + Packet Type
pub const MIN_PACKET_SIZE: usize = 32 + 65 + 1;

/// An error decoding or validating a discovery packet.
#[derive(Debug, thiserror::Error)]
pub enum DiscError {
    /// The datagram exceeds the protocol's packet cap.
    #[error("packet of {0} bytes exceeds the {MAX_PACKET_SIZE} byte cap")]
    Oversize(usize),
    /// The datagram is too short to carry the packet header.
    #[error("malformed packet")]
    InvalidFormat,
    /// Hash of the header does not equal the hash of the data.
    #[error("packet hash mismatch")]
    HashMismatch,
    /// The packet type byte is not a known message.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),
    /// The signature did not recover to a valid public key.
    #[error(transparent)]
    Secp256k1(#[from] secp256k1::Error),
    /// The packet body failed to decode.
    #[error(transparent)]
    Rlp(#[from] alloy_rlp::Error),
}
