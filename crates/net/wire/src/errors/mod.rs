//! Error types for stream operations in this crate.

mod p2p;
pub use p2p::{P2PHandshakeError, P2PStreamError};

mod light;
pub use light::{LightHandshakeError, LightStreamError};
