//! Trie node decoding.

use crate::ProofError;
use alloy_primitives::{Bytes, B256};
use nybbles::Nibbles;

/// A reference from a node to one of its children: either the child's hash
/// or, for children whose encoding is shorter than a hash, the child node
/// embedded inline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChildRef {
    /// The keccak hash of the child's encoding.
    Hash(B256),
    /// The child's whole encoding, inlined.
    Inline(Bytes),
}

impl ChildRef {
    /// Whether `encoded` is the node this reference points to.
    pub fn matches(&self, encoded: &[u8]) -> bool {
        match self {
            Self::Hash(hash) => alloy_primitives::keccak256(encoded) == *hash,
            Self::Inline(inline) => inline.as_ref() == encoded,
        }
    }
}

/// A single node of a proof path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofNode {
    /// A leaf: the remainder of a key and its value.
    Leaf {
        /// Key nibbles below this node.
        path: Nibbles,
        /// The stored value.
        value: Bytes,
    },
    /// An extension: a shared run of key nibbles above a single child.
    Extension {
        /// The shared nibbles.
        path: Nibbles,
        /// The child below the shared run.
        child: ChildRef,
    },
    /// A branch: one child slot per nibble plus an optional value for keys
    /// ending here.
    Branch {
        /// Child references, indexed by nibble.
        children: Box<[Option<ChildRef>; 16]>,
        /// The value of a key terminating at this node.
        value: Option<Bytes>,
    },
}

/// Decodes a hex-prefix encoded path into its nibbles and the leaf flag.
fn decode_hex_prefix(encoded: &[u8]) -> Result<(Nibbles, bool), ProofError> {
    let first = *encoded.first().ok_or(ProofError::InvalidPathEncoding)?;
    let flag = first >> 4;
    if flag > 3 {
        return Err(ProofError::InvalidPathEncoding)
    }
    let is_leaf = flag >= 2;
    let is_odd = flag & 1 == 1;

    let nibbles = Nibbles::unpack(encoded);
    // skip the flag nibble, and the padding nibble when the path is even
    let path = nibbles.slice(if is_odd { 1 } else { 2 }..);
    Ok((path, is_leaf))
}

fn decode_child(buf: &mut &[u8]) -> Result<Option<ChildRef>, ProofError> {
    let mut peek = *buf;
    let header = alloy_rlp::Header::decode(&mut peek)?;
    if header.list {
        // an inline child node, kept whole
        let total = (buf.len() - peek.len()) + header.payload_length;
        let inline = Bytes::copy_from_slice(&buf[..total]);
        *buf = &buf[total..];
        return Ok(Some(ChildRef::Inline(inline)))
    }
    match header.payload_length {
        0 => {
            *buf = peek;
            Ok(None)
        }
        32 => {
            let hash = B256::from_slice(&peek[..32]);
            *buf = &peek[32..];
            Ok(Some(ChildRef::Hash(hash)))
        }
        _ => Err(ProofError::InvalidChildReference),
    }
}

impl ProofNode {
    /// Decodes a node from its RLP encoding: either the two-element
    /// leaf/extension form or the seventeen-element branch form.
    pub fn decode(encoded: &[u8]) -> Result<Self, ProofError> {
        let mut buf = encoded;
        let header = alloy_rlp::Header::decode(&mut buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString.into())
        }
        if buf.len() < header.payload_length {
            return Err(alloy_rlp::Error::InputTooShort.into())
        }
        let mut body = &buf[..header.payload_length];

        // count the items to pick the node form
        let mut items = 0usize;
        {
            let mut scan = body;
            while !scan.is_empty() {
                let item = alloy_rlp::Header::decode(&mut scan)?;
                if scan.len() < item.payload_length {
                    return Err(alloy_rlp::Error::InputTooShort.into())
                }
                scan = &scan[item.payload_length..];
                items += 1;
            }
        }

        match items {
            2 => {
                let encoded_path: Bytes = alloy_rlp::Decodable::decode(&mut body)?;
                let (path, is_leaf) = decode_hex_prefix(&encoded_path)?;
                if is_leaf {
                    let value: Bytes = alloy_rlp::Decodable::decode(&mut body)?;
                    Ok(Self::Leaf { path, value })
                } else {
                    let child = decode_child(&mut body)?
                        .ok_or(ProofError::InvalidChildReference)?;
                    Ok(Self::Extension { path, child })
                }
            }
            17 => {
                let mut children: [Option<ChildRef>; 16] = Default::default();
                for slot in children.iter_mut() {
                    *slot = decode_child(&mut body)?;
                }
                let value: Bytes = alloy_rlp::Decodable::decode(&mut body)?;
                let value = if value.is_empty() { None } else { Some(value) };
                Ok(Self::Branch { children: Box::new(children), value })
            }
            _ => Err(alloy_rlp::Error::Custom("trie node must have 2 or 17 items").into()),
        }
    }

    /// The value terminating at this node, if any. Only leaves and branches
    /// can carry one.
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            Self::Leaf { value, .. } => Some(value),
            Self::Branch { value, .. } => value.as_ref(),
            Self::Extension { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn hex_prefix_flags() {
        // leaf with even path [1, 2]: 0x20 0x12
        let (path, is_leaf) = decode_hex_prefix(&hex!("2012")).unwrap();
        assert!(is_leaf);
        assert_eq!(path, Nibbles::from_nibbles([0x1, 0x2]));

        // extension with odd path [7]: 0x17
        let (path, is_leaf) = decode_hex_prefix(&hex!("17")).unwrap();
        assert!(!is_leaf);
        assert_eq!(path, Nibbles::from_nibbles([0x7]));

        // leaf with empty path: 0x20
        let (path, is_leaf) = decode_hex_prefix(&hex!("20")).unwrap();
        assert!(is_leaf);
        assert!(path.is_empty());
    }

    #[test]
    fn rejects_bad_flags() {
        assert!(decode_hex_prefix(&hex!("42")).is_err());
        assert!(decode_hex_prefix(&[]).is_err());
    }
}
