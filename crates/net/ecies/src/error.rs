use std::io;

/// An error that occurs while establishing or driving an ECIES connection.
///
/// Any MAC, tag or signature mismatch is terminal for the connection attempt;
/// the caller owns retry policy.
#[derive(Debug, thiserror::Error)]
pub enum ECIESError {
    /// Error during IO
    #[error(transparent)]
    IO(#[from] io::Error),
    /// Error when checking the HMAC tag of an auth or ack message
    #[error("tag check failure in read_header")]
    TagCheckDecryptFailed,
    /// Error when checking the MAC of a frame header
    #[error("tag check failure in header")]
    TagCheckHeaderFailed,
    /// Error when checking the MAC of a frame body
    #[error("tag check failure in body")]
    TagCheckBodyFailed,
    /// The auth message was malformed
    #[error("invalid auth data")]
    InvalidAuthData,
    /// The ack message was malformed
    #[error("invalid ack data")]
    InvalidAckData,
    /// An encrypted message is too short to carry its own envelope
    #[error("encrypted data is not large enough for all fields")]
    EncryptedDataTooSmall,
    /// The frame header declared a zero-sized body
    #[error("body size is zero")]
    ZeroBodySize,
    /// The stream produced a handshake message out of order
    #[error("invalid handshake: expected {expected}, got {got:?}")]
    InvalidHandshake {
        /// What the handshake step required.
        expected: &'static str,
        /// What actually arrived, if anything.
        got: Option<String>,
    },
    /// The stream ended mid-handshake
    #[error("stream closed during handshake")]
    UnreadableStream,
    /// Error from the underlying elliptic curve operations
    #[error(transparent)]
    Secp256k1(#[from] secp256k1::Error),
    /// Error when decoding the RLP body of an auth or ack message
    #[error(transparent)]
    Rlp(#[from] alloy_rlp::Error),
}

impl From<ECIESError> for io::Error {
    fn from(err: ECIESError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}
