use crate::capability::Capability;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use lantern_primitives::PeerId;

/// The default port a peer advertises when it does not listen for incoming
/// connections.
pub const DEFAULT_TCP_PORT: u16 = 30303;

const CLIENT_VERSION: &str = concat!("lantern/v", env!("CARGO_PKG_VERSION"));

/// Raw rlpx protocol message used in the `p2p` handshake, containing
/// information about the supported RLPx protocol version and capabilities.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HelloMessage {
    /// The version of the `p2p` protocol.
    pub protocol_version: u8,
    /// Specifies the client software identity, as a human-readable string
    /// (e.g. "lantern/v0.1.0").
    pub client_version: String,
    /// The list of supported capabilities and their versions.
    pub capabilities: Vec<Capability>,
    /// The port that the client is listening on, zero indicates the client is
    /// not listening.
    pub port: u16,
    /// The secp256k1 public key corresponding to the node's private key.
    pub id: PeerId,
}

// === impl HelloMessage ===

impl HelloMessage {
    /// Starts a new `HelloMessageBuilder`
    pub fn builder(id: PeerId) -> HelloMessageBuilder {
        HelloMessageBuilder::new(id)
    }
}

/// Builder for [`HelloMessage`]
#[derive(Debug)]
pub struct HelloMessageBuilder {
    /// The version of the `p2p` protocol.
    pub protocol_version: Option<u8>,
    /// Specifies the client software identity, as a human-readable string.
    pub client_version: Option<String>,
    /// The list of supported capabilities.
    pub capabilities: Option<Vec<Capability>>,
    /// The port that the client is listening on.
    pub port: Option<u16>,
    /// The secp256k1 public key corresponding to the node's private key.
    pub id: PeerId,
}

// === impl HelloMessageBuilder ===

impl HelloMessageBuilder {
    /// Create a new builder to configure a [`HelloMessage`]
    pub fn new(id: PeerId) -> Self {
        Self { protocol_version: None, client_version: None, capabilities: None, port: None, id }
    }

    /// Sets the port the client is listening on
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Adds a new capability to use.
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.get_or_insert_with(Vec::new).push(capability);
        self
    }

    /// Sets capabilities to use.
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.get_or_insert_with(Vec::new).extend(capabilities);
        self
    }

    /// Sets client version.
    pub fn client_version(mut self, client_version: impl Into<String>) -> Self {
        self.client_version = Some(client_version.into());
        self
    }

    /// Sets protocol version.
    pub fn protocol_version(mut self, protocol_version: u8) -> Self {
        self.protocol_version = Some(protocol_version);
        self
    }

    /// Consumes the type and returns the configured [`HelloMessage`]
    ///
    /// Unset fields default to p2p version 5, the lantern client version and
    /// both light capabilities.
    pub fn build(self) -> HelloMessage {
        let Self { protocol_version, client_version, capabilities, port, id } = self;
        HelloMessage {
            protocol_version: protocol_version.unwrap_or(5),
            client_version: client_version.unwrap_or_else(|| CLIENT_VERSION.to_string()),
            capabilities: capabilities
                .unwrap_or_else(|| vec![Capability::les(2), Capability::pip(1)]),
            port: port.unwrap_or(DEFAULT_TCP_PORT),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_rlp::{Decodable, Encodable, EMPTY_STRING_CODE};
    use lantern_ecies::util::pk2id;
    use secp256k1::{SecretKey, SECP256K1};

    use crate::{capability::Capability, p2pstream::P2PMessage, HelloMessage};

    #[test]
    fn test_hello_encoding_round_trip() {
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let id = pk2id(&secret_key.public_key(SECP256K1));
        let hello = P2PMessage::Hello(HelloMessage {
            protocol_version: 5,
            client_version: "lantern/v0.1.0".to_string(),
            capabilities: vec![Capability::les(2)],
            port: 30303,
            id,
        });

        let mut hello_encoded = Vec::new();
        hello.encode(&mut hello_encoded);

        let hello_decoded = P2PMessage::decode(&mut &hello_encoded[..]).unwrap();

        assert_eq!(hello, hello_decoded);
    }

    #[test]
    fn hello_encoding_length() {
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let id = pk2id(&secret_key.public_key(SECP256K1));
        let hello = P2PMessage::Hello(HelloMessage::builder(id).build());

        let mut hello_encoded = Vec::new();
        hello.encode(&mut hello_encoded);

        assert_eq!(hello_encoded.len(), hello.length());
    }

    #[test]
    fn hello_message_id_prefix() {
        // ensure that the hello message id is prefixed
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let id = pk2id(&secret_key.public_key(SECP256K1));
        let hello = P2PMessage::Hello(HelloMessage::builder(id).build());

        let mut hello_encoded = Vec::new();
        hello.encode(&mut hello_encoded);

        // zero is encoded as 0x80, the empty string code in RLP
        assert_eq!(hello_encoded[0], EMPTY_STRING_CODE);
    }
}
