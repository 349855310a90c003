//! Error types for the client crate.

use crate::route::ProtocolError;
use lantern_trie::ProofError;
use lantern_wire::DisconnectReason;
use std::io;

/// Errors at the manager boundary.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// IO error while setting up local resources.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The manager was asked to submit but no node is connected.
    #[error("no connected node available")]
    NoConnectedNode,
    /// The manager is shut down.
    #[error("manager is shut down")]
    ShutDown,
}

/// Why a single provision failed. Local to one provisioner; the node and its
/// other provisioners are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The peer answered with zero items.
    #[error("peer returned an empty response")]
    EmptyResponse,
    /// A response carried a different message kind than the request.
    #[error("peer answered with the wrong response kind")]
    WrongResponseKind,
    /// A proof in the response was malformed or did not hash to the trusted
    /// root.
    #[error("invalid proof: {0}")]
    InvalidProof(#[from] ProofError),
    /// A proof resolved, but the key was absent from the trie.
    #[error("proof does not contain the requested key")]
    KeyNotFound,
    /// A response value failed to decode.
    #[error("malformed response value: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// The request could not be handed to the node's connection.
    #[error("node connection is gone")]
    SendFailed,
    /// The owning node's route died before the provision completed.
    #[error("node disconnected before completion")]
    Disconnected {
        /// The peer's stated reason, when there was one.
        reason: Option<DisconnectReason>,
    },
    /// The owning node's route hit a protocol violation before completion.
    #[error("node failed before completion: {0}")]
    NodeFailed(ProtocolError),
    /// A provision was submitted with nothing to request.
    #[error("provision requests zero items")]
    EmptyRequest,
}
