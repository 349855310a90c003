#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! The devp2p base protocol and the light client sub-protocols on top of it.
//!
//! Layered bottom-up: an encrypted byte transport (`lantern-ecies`), the
//! `p2p` capability handshake and keepalive ([`P2PStream`]), and the
//! negotiated light wire family ([`LightStream`]) speaking either LES or PIP
//! encodings of the same seven request kinds.

pub mod capability;
pub use capability::{Capability, LightProtocol, SharedCapability};

pub mod credits;
pub use credits::{CostEntry, CostTable, Credits, FlowControlParams};

mod disconnect;
pub use disconnect::DisconnectReason;

pub mod errors;

mod hello;
pub use hello::{HelloMessage, HelloMessageBuilder};

pub mod les;
pub mod pip;

pub mod message;
pub use message::{
    Announce, GetBlockHeaders, HashOrNumber, HeaderProof, HeaderProofRequest, LightMessage,
    ProofNodes, ProofRequest, RequestKind, RequestPair, ResponsePair,
};

mod lightstream;
pub use lightstream::{decode_message, encode_message, LightStream, UnauthedLightStream};

mod p2pstream;
pub use p2pstream::{
    P2PMessage, P2PMessageID, P2PStream, UnauthedP2PStream, MAX_PAYLOAD_SIZE,
};

mod status;
pub use status::{LightStatus, LightStatusBuilder};

mod codec;
pub use codec::PassthroughCodec;

/// The per-message item cap of a request kind under the given wire family.
pub const fn content_limit(protocol: LightProtocol, kind: RequestKind) -> usize {
    match protocol {
        LightProtocol::Les => les::content_limit(kind),
        LightProtocol::Pip => pip::content_limit(kind),
    }
}
