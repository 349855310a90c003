//! Error handling for the base `p2p` protocol.

use crate::DisconnectReason;
use std::io;

/// Errors when sending/receiving `p2p` messages. These should result in
/// disconnecting the peer.
#[derive(thiserror::Error, Debug)]
pub enum P2PStreamError {
    /// IO error on the underlying transport.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// RLP decode failure.
    #[error(transparent)]
    Rlp(#[from] alloy_rlp::Error),
    /// Error during the Hello exchange.
    #[error(transparent)]
    HandshakeError(#[from] P2PHandshakeError),
    /// A message larger than the cap arrived.
    #[error("message size ({message_size}) exceeds max length ({max_size})")]
    MessageTooBig {
        /// The size of the message
        message_size: usize,
        /// The max possible size of the message
        max_size: usize,
    },
    /// A message with a reserved id we do not implement arrived.
    #[error("unknown reserved p2p message id: {0}")]
    UnknownReservedMessageId(u8),
    /// A zero-length message arrived.
    #[error("empty protocol message received")]
    EmptyProtocolMessage,
    /// The peer did not answer our keepalive ping in time.
    #[error("ping timed out")]
    PingTimeout,
    /// The peer announced it is disconnecting.
    #[error("disconnected by peer: {0}")]
    Disconnected(DisconnectReason),
    /// A send was attempted while the local side is already disconnecting.
    #[error("already disconnecting")]
    AlreadyDisconnecting,
}

// === impl P2PStreamError ===

impl P2PStreamError {
    /// Returns the [`DisconnectReason`] if the error is a disconnect message
    pub fn as_disconnected(&self) -> Option<DisconnectReason> {
        let reason = match self {
            P2PStreamError::HandshakeError(P2PHandshakeError::Disconnected(reason)) => reason,
            P2PStreamError::Disconnected(reason) => reason,
            _ => return None,
        };
        Some(*reason)
    }
}

/// Errors that can occur during the `p2p` handshake.
#[derive(thiserror::Error, Debug)]
pub enum P2PHandshakeError {
    /// The handshake timed out.
    #[error("handshake timed out")]
    Timeout,
    /// The stream ended before the peer's Hello arrived.
    #[error("no response from peer")]
    NoResponse,
    /// The first message was not a Hello.
    #[error("received non-hello message when trying to handshake")]
    NonHelloMessageInHandshake,
    /// A Hello arrived outside of the handshake.
    #[error("hello message can only be recv/sent in handshake")]
    HelloNotInHandshake,
    /// The peer disconnected mid-handshake.
    #[error("disconnected by peer: {0}")]
    Disconnected(DisconnectReason),
    /// The peer advertises none of our required capabilities.
    #[error("no capability in common with peer")]
    NoSharedCapability,
    /// The peer's Hello did not decode.
    #[error(transparent)]
    DecodeError(#[from] alloy_rlp::Error),
}
