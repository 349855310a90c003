//! Capability announcements and the result of capability negotiation.

use alloy_rlp::{RlpDecodable, RlpEncodable};

/// The lowest message id available to sub-protocols; everything below is
/// reserved for the base `p2p` capability.
pub const MAX_RESERVED_MESSAGE_ID: u8 = 0x0f;

/// A capability announced in a Hello message: a short protocol name and a
/// version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Capability {
    /// The name of the subprotocol
    pub name: String,
    /// The version of the subprotocol
    pub version: usize,
}

impl Capability {
    /// Create a new `Capability` with the given name and version.
    pub fn new(name: String, version: usize) -> Self {
        Self { name, version }
    }

    /// The `les` capability at `version`.
    pub fn les(version: usize) -> Self {
        Self::new("les".to_string(), version)
    }

    /// The `pip` capability at `version`.
    pub fn pip(version: usize) -> Self {
        Self::new("pip".to_string(), version)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// The family a shared capability belongs to, which selects the wire codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightProtocol {
    /// The Geth light client protocol.
    Les,
    /// The Parity light client protocol.
    Pip,
}

impl LightProtocol {
    /// The capability name on the wire.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Les => "les",
            Self::Pip => "pip",
        }
    }
}

/// A capability shared by both sides of the connection, together with the
/// message-id offset its messages live at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedCapability {
    /// The protocol family.
    pub protocol: LightProtocol,
    /// The negotiated version.
    pub version: usize,
    /// First message id assigned to this capability.
    pub offset: u8,
}

impl SharedCapability {
    /// Resolves the highest shared light protocol between our and the peer's
    /// capability lists. Returns `None` when the peer serves neither `les`
    /// nor `pip` at a version we speak.
    pub fn try_negotiate(ours: &[Capability], theirs: &[Capability]) -> Option<Self> {
        let mut best: Option<(LightProtocol, usize)> = None;
        for ours in ours {
            let protocol = match ours.name.as_str() {
                "les" => LightProtocol::Les,
                "pip" => LightProtocol::Pip,
                _ => continue,
            };
            if theirs.iter().any(|c| c.name == ours.name && c.version == ours.version) {
                match best {
                    Some((_, version)) if version >= ours.version => {}
                    _ => best = Some((protocol, ours.version)),
                }
            }
        }
        // a single light subprotocol occupies the whole space above p2p
        best.map(|(protocol, version)| Self {
            protocol,
            version,
            offset: MAX_RESERVED_MESSAGE_ID + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_highest_shared_version() {
        let ours = vec![Capability::les(2), Capability::les(3), Capability::pip(1)];
        let theirs = vec![Capability::les(2), Capability::les(3)];
        let shared = SharedCapability::try_negotiate(&ours, &theirs).unwrap();
        assert_eq!(shared.protocol, LightProtocol::Les);
        assert_eq!(shared.version, 3);
        assert_eq!(shared.offset, 0x10);
    }

    #[test]
    fn no_shared_capability() {
        let ours = vec![Capability::les(2)];
        let theirs = vec![Capability::new("eth".to_string(), 68)];
        assert!(SharedCapability::try_negotiate(&ours, &theirs).is_none());
    }

    #[test]
    fn ignores_unknown_remote_capabilities() {
        let ours = vec![Capability::pip(1)];
        let theirs = vec![
            Capability::new("eth".to_string(), 67),
            Capability::pip(1),
            Capability::new("snap".to_string(), 1),
        ];
        let shared = SharedCapability::try_negotiate(&ours, &theirs).unwrap();
        assert_eq!(shared.protocol, LightProtocol::Pip);
    }
}
