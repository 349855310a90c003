//! Error handling for the light sub-protocol stream.

use crate::{errors::P2PStreamError, DisconnectReason};
use alloy_primitives::B256;
use std::io;

/// Errors when sending/receiving light protocol messages.
#[derive(thiserror::Error, Debug)]
pub enum LightStreamError {
    /// Error on the underlying `p2p` stream.
    #[error(transparent)]
    P2PStreamError(#[from] P2PStreamError),
    /// Error during the Status exchange.
    #[error(transparent)]
    HandshakeError(#[from] LightHandshakeError),
    /// A message failed to decode.
    #[error(transparent)]
    Rlp(#[from] alloy_rlp::Error),
    /// A message id outside the negotiated capability arrived.
    #[error("message id {0:#04x} is not valid for the negotiated capability")]
    InvalidMessageId(u8),
    /// A mixed or otherwise malformed request batch arrived.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
}

// === impl LightStreamError ===

impl LightStreamError {
    /// Returns the [`DisconnectReason`] if the error is a disconnect message
    pub fn as_disconnected(&self) -> Option<DisconnectReason> {
        match self {
            LightStreamError::P2PStreamError(err) => err.as_disconnected(),
            LightStreamError::HandshakeError(LightHandshakeError::Disconnected(reason)) => {
                Some(*reason)
            }
            _ => None,
        }
    }

    /// Returns the [`io::Error`] if it was caused by IO
    pub fn as_io(&self) -> Option<&io::Error> {
        if let LightStreamError::P2PStreamError(P2PStreamError::Io(io)) = self {
            return Some(io)
        }
        None
    }
}

/// Error that can occur during the light sub-protocol handshake.
#[derive(thiserror::Error, Debug)]
pub enum LightHandshakeError {
    /// A status message was received or sent outside of the handshake.
    #[error("status message can only be recv/sent in handshake")]
    StatusNotInHandshake,
    /// A non-status message was received during the handshake.
    #[error("received non-status message when trying to handshake")]
    NonStatusMessageInHandshake,
    /// The stream ended before the peer's status arrived.
    #[error("no response received when sending out handshake")]
    NoResponse,
    /// The peer disconnected mid-handshake.
    #[error("disconnected by peer: {0}")]
    Disconnected(DisconnectReason),
    /// The peer serves a different chain.
    #[error("mismatched genesis in status message: got {got}, expected {expected}")]
    MismatchedGenesis {
        /// The genesis we expect.
        expected: B256,
        /// The genesis the peer announced.
        got: B256,
    },
    /// The peer serves a different network.
    #[error("mismatched network id in status message: got {got}, expected {expected}")]
    MismatchedNetwork {
        /// The network id we expect.
        expected: u64,
        /// The network id the peer announced.
        got: u64,
    },
}
