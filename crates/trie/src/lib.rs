#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Merkle Patricia Trie proof verification.
//!
//! A proof is an ordered list of trie nodes from the root towards a key. A
//! [`NodePath`](proof::NodePath) resolves a key against that list, checking
//! the hash link from each node to the next, and extracts the terminal value
//! if the key is present.

pub mod node;
pub use node::{ChildRef, ProofNode};

pub mod proof;
pub use proof::NodePath;

/// An error decoding or resolving a proof path.
///
/// Note that a *mismatching* proof is not an error: resolution reports "not
/// found". Errors are reserved for proofs that are malformed or do not hash
/// together at all.
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    /// A node in the path failed to decode; the whole path is unusable.
    #[error(transparent)]
    Rlp(#[from] alloy_rlp::Error),
    /// A node's path was not valid hex-prefix encoding.
    #[error("invalid hex prefix encoding in node path")]
    InvalidPathEncoding,
    /// A branch child slot was neither empty, a hash, nor an inline node.
    #[error("invalid child reference")]
    InvalidChildReference,
    /// A node does not hash to the reference its parent carries.
    #[error("node {index} does not match the hash its parent links to")]
    HashMismatch {
        /// Position of the offending node in the path.
        index: usize,
    },
    /// The path is empty.
    #[error("empty proof path")]
    Empty,
}
