//! Proof path resolution.

use crate::{node::ProofNode, ProofError};
use alloy_primitives::{keccak256, Bytes, B256};
use nybbles::Nibbles;

/// An ordered proof path: the trie nodes from the root towards one or more
/// keys, exactly as a peer supplied them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePath {
    nodes: Vec<ProofNode>,
    raw: Vec<Bytes>,
}

impl NodePath {
    /// Decodes every node of a proof. A single malformed node makes the
    /// whole path unusable.
    pub fn decode(raw: &[Bytes]) -> Result<Self, ProofError> {
        if raw.is_empty() {
            return Err(ProofError::Empty)
        }
        let nodes = raw.iter().map(|node| ProofNode::decode(node)).collect::<Result<_, _>>()?;
        Ok(Self { nodes, raw: raw.to_vec() })
    }

    /// The decoded nodes in path order.
    pub fn nodes(&self) -> &[ProofNode] {
        &self.nodes
    }

    /// Resolves `key` against the path and returns the node it terminates
    /// in, or `None` when the path shows the key absent (or proves nothing
    /// about it, which callers must treat the same way).
    pub fn node(&self, key: &Nibbles) -> Option<&ProofNode> {
        let mut remaining = key.clone();
        let mut index = 0;

        while let Some(node) = self.nodes.get(index) {
            match node {
                ProofNode::Leaf { path, .. } => {
                    if remaining == *path {
                        return Some(node)
                    }
                    // a server may terminate a fully consumed key with a
                    // trailing leaf whose path is empty; the value lives
                    // there rather than in the branch above it
                    if path.is_empty() && remaining.is_empty() {
                        return Some(node)
                    }
                    return None
                }
                ProofNode::Extension { path, .. } => {
                    if path.is_empty() || !remaining.starts_with(path) {
                        return None
                    }
                    remaining = remaining.slice(path.len()..);
                }
                ProofNode::Branch { children, value } => {
                    if remaining.is_empty() {
                        if value.is_some() {
                            return Some(node)
                        }
                        // the trailing empty-path leaf again, one level up
                        if let Some(ProofNode::Leaf { path, .. }) = self.nodes.get(index + 1) {
                            if path.is_empty() {
                                return self.nodes.get(index + 1)
                            }
                        }
                        return None
                    }
                    let nibble = remaining.at(0);
                    children[nibble].as_ref()?;
                    remaining = remaining.slice(1..);
                }
            }
            index += 1;
        }
        None
    }

    /// Resolves `key` and extracts its value. Only leaves and branches
    /// terminate a key with a value; anything else is "not found".
    pub fn value(&self, key: &Nibbles) -> Option<Bytes> {
        self.node(key).and_then(|node| node.value().cloned())
    }

    /// Checks that the path hashes together: the first node must hash to
    /// `root` and every later node must hash to the reference the node above
    /// it carries along the walk of `key`.
    ///
    /// A key that walks off the path early is fine; only the nodes the walk
    /// actually visits are linked.
    pub fn verify(&self, root: B256, key: &Nibbles) -> Result<(), ProofError> {
        let first = self.raw.first().ok_or(ProofError::Empty)?;
        if keccak256(first) != root {
            return Err(ProofError::HashMismatch { index: 0 })
        }

        let mut remaining = key.clone();
        for (index, node) in self.nodes.iter().enumerate() {
            let child = match node {
                ProofNode::Leaf { .. } => break,
                ProofNode::Extension { path, child } => {
                    if !remaining.starts_with(path) {
                        break
                    }
                    remaining = remaining.slice(path.len()..);
                    Some(child)
                }
                ProofNode::Branch { children, .. } => {
                    if remaining.is_empty() {
                        // only the trailing empty-path leaf can follow
                        None
                    } else {
                        let nibble = remaining.at(0);
                        remaining = remaining.slice(1..);
                        children[nibble].as_ref()
                    }
                }
            };

            let Some(next_raw) = self.raw.get(index + 1) else { break };
            match child {
                Some(child) => {
                    if !child.matches(next_raw) {
                        return Err(ProofError::HashMismatch { index: index + 1 })
                    }
                }
                // trailing empty-path leaves hang off the branch unlinked;
                // anything else after a consumed key is not part of this walk
                None => break,
            }
        }
        Ok(())
    }

    /// Verifies the hash links and resolves the value in one step: the only
    /// entry point provisioned responses go through.
    pub fn verified_value(&self, root: B256, key: &Nibbles) -> Result<Option<Bytes>, ProofError> {
        self.verify(root, key)?;
        Ok(self.value(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use alloy_rlp::Encodable;
    use lantern_primitives::Account;

    /// Hex-prefix encodes `nibbles`.
    fn hex_prefix(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
        let mut flag: u8 = if is_leaf { 0x20 } else { 0x00 };
        let mut out = Vec::new();
        if nibbles.len() % 2 == 1 {
            flag |= 0x10;
            out.push((flag & 0xf0) | nibbles[0]);
            for pair in nibbles[1..].chunks(2) {
                out.push((pair[0] << 4) | pair[1]);
            }
        } else {
            out.push(flag);
            for pair in nibbles.chunks(2) {
                out.push((pair[0] << 4) | pair[1]);
            }
        }
        out
    }

    fn encode_leaf(nibbles: &[u8], value: &[u8]) -> Bytes {
        let mut out = Vec::new();
        let path = hex_prefix(nibbles, true);
        let payload = path.as_slice().length() + value.length();
        alloy_rlp::Header { list: true, payload_length: payload }.encode(&mut out);
        path.as_slice().encode(&mut out);
        value.encode(&mut out);
        out.into()
    }

    fn encode_extension(nibbles: &[u8], child_hash: B256) -> Bytes {
        let mut out = Vec::new();
        let path = hex_prefix(nibbles, false);
        let payload = path.as_slice().length() + child_hash.length();
        alloy_rlp::Header { list: true, payload_length: payload }.encode(&mut out);
        path.as_slice().encode(&mut out);
        child_hash.encode(&mut out);
        out.into()
    }

    fn encode_branch(children: [Option<B256>; 16], value: Option<&[u8]>) -> Bytes {
        let empty: &[u8] = &[];
        let mut payload = 0;
        for child in &children {
            payload += match child {
                Some(hash) => hash.length(),
                None => empty.length(),
            };
        }
        payload += value.unwrap_or(empty).length();

        let mut out = Vec::new();
        alloy_rlp::Header { list: true, payload_length: payload }.encode(&mut out);
        for child in &children {
            match child {
                Some(hash) => hash.encode(&mut out),
                None => empty.encode(&mut out),
            }
        }
        value.unwrap_or(empty).encode(&mut out);
        out.into()
    }

    /// Builds a two-level proof: branch at the root, leaf below nibble 7.
    fn sample_proof(value: &[u8]) -> (B256, Nibbles, Vec<Bytes>) {
        // full key = [7] ++ leaf path [1, 2, 3]
        let leaf = encode_leaf(&[1, 2, 3], value);
        let leaf_hash = keccak256(&leaf);

        let mut children: [Option<B256>; 16] = Default::default();
        children[7] = Some(leaf_hash);
        let branch = encode_branch(children, None);
        let root = keccak256(&branch);

        (root, Nibbles::from_nibbles([7, 1, 2, 3]), vec![branch, leaf])
    }

    #[test]
    fn resolves_known_key() {
        let account = Account {
            nonce: 9,
            balance: U256::from(1_000_000u64),
            storage_root: B256::repeat_byte(0x33),
            code_hash: B256::repeat_byte(0x44),
        };
        let mut value = Vec::new();
        account.encode(&mut value);

        let (root, key, raw) = sample_proof(&value);
        let path = NodePath::decode(&raw).unwrap();

        let resolved = path.verified_value(root, &key).unwrap().unwrap();
        let decoded =
            <Account as alloy_rlp::Decodable>::decode(&mut resolved.as_ref()).unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn absent_key_resolves_to_none() {
        let (root, _, raw) = sample_proof(b"value");
        let path = NodePath::decode(&raw).unwrap();

        // nibble 8 has no child in the root branch
        let absent = Nibbles::from_nibbles([8, 1, 2, 3]);
        assert_eq!(path.verified_value(root, &absent).unwrap(), None);

        // right branch slot, wrong leaf remainder
        let wrong = Nibbles::from_nibbles([7, 9, 9, 9]);
        assert_eq!(path.verified_value(root, &wrong).unwrap(), None);
    }

    #[test]
    fn corrupted_node_fails_hash_check_not_value() {
        let (root, key, mut raw) = sample_proof(b"value");
        // flip one byte of the leaf: the branch's child hash no longer
        // matches
        let mut leaf = raw[1].to_vec();
        let last = leaf.len() - 1;
        leaf[last] ^= 0x01;
        raw[1] = leaf.into();

        let path = NodePath::decode(&raw).unwrap();
        assert!(matches!(
            path.verify(root, &key),
            Err(ProofError::HashMismatch { index: 1 })
        ));
    }

    #[test]
    fn wrong_root_is_rejected() {
        let (_, key, raw) = sample_proof(b"value");
        let path = NodePath::decode(&raw).unwrap();
        assert!(matches!(
            path.verify(B256::repeat_byte(0xde), &key),
            Err(ProofError::HashMismatch { index: 0 })
        ));
    }

    #[test]
    fn extension_prefixes_are_consumed_exactly() {
        let leaf = encode_leaf(&[5], b"deep");
        let leaf_hash = keccak256(&leaf);
        let ext = encode_extension(&[0xa, 0xb], leaf_hash);
        let root = keccak256(&ext);
        let raw = vec![ext, leaf];
        let path = NodePath::decode(&raw).unwrap();

        let key = Nibbles::from_nibbles([0xa, 0xb, 5]);
        assert_eq!(path.verified_value(root, &key).unwrap().unwrap().as_ref(), b"deep");

        // a key that diverges inside the extension prefix is absent
        let miss = Nibbles::from_nibbles([0xa, 0xc, 5]);
        assert_eq!(path.value(&miss), None);
    }

    #[test]
    fn branch_value_terminates_fully_consumed_key() {
        let mut children: [Option<B256>; 16] = Default::default();
        children[3] = Some(B256::repeat_byte(0x99));
        let branch = encode_branch(children, Some(b"at-branch"));
        let root = keccak256(&branch);
        let path = NodePath::decode(&[branch.clone()]).unwrap();

        let key = Nibbles::default();
        assert_eq!(path.verified_value(root, &key).unwrap().unwrap().as_ref(), b"at-branch");
    }

    #[test]
    fn trailing_empty_path_leaf_carries_the_value() {
        // branch with no value slot, followed by an empty-path leaf holding
        // the terminal value of the consumed key
        let leaf = encode_leaf(&[], b"trailing");
        let mut children: [Option<B256>; 16] = Default::default();
        children[0] = Some(B256::repeat_byte(0x11));
        let branch = encode_branch(children, None);
        let root = keccak256(&branch);

        let path = NodePath::decode(&[branch, leaf]).unwrap();
        let key = Nibbles::default();
        assert_eq!(path.verified_value(root, &key).unwrap().unwrap().as_ref(), b"trailing");
    }

    #[test]
    fn malformed_node_fails_decode() {
        let (_, _, mut raw) = sample_proof(b"value");
        // truncate the branch so its items cannot be decoded
        let truncated = raw[0][..raw[0].len() - 4].to_vec();
        raw[0] = truncated.into();
        assert!(NodePath::decode(&raw).is_err());
    }
}
