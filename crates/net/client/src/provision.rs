//! Logical requests and their assembled results.

use crate::error::ProvisionError;
use alloy_primitives::{Address, B256};
use lantern_primitives::{
    Account, BlockBody, Header, PeerId, Receipt, RlpItem, TransactionStatus,
};
use lantern_wire::{HeaderProof, RequestKind};

/// Caller-level identifier of a provision, used to match async results.
/// Independent of wire request ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProvisionId(pub u64);

/// One logical request and, once filled in, its response slots.
///
/// Response vectors are pre-sized to the full request before anything is
/// sent, so responses can land at their offset in any arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provision {
    /// A window of consecutive headers.
    Headers {
        /// First block number of the window.
        start: u64,
        /// Blocks skipped between consecutive headers.
        skip: u64,
        /// Number of headers wanted.
        max: usize,
        /// Walk towards genesis instead of towards the head.
        reverse: bool,
        /// One slot per requested header, in request order.
        headers: Vec<Option<Header>>,
    },
    /// Canonical-hash-trie proofs for old headers.
    BlockProofs {
        /// The block numbers to prove.
        numbers: Vec<u64>,
        /// The trusted trie root to verify against, when the caller has one.
        cht_root: Option<B256>,
        /// One slot per requested number.
        proofs: Vec<Option<HeaderProof>>,
    },
    /// Block bodies by hash.
    Bodies {
        /// The block hashes to fetch.
        hashes: Vec<B256>,
        /// One slot per requested hash.
        bodies: Vec<Option<BlockBody>>,
    },
    /// Per-block receipt lists by hash.
    Receipts {
        /// The block hashes to fetch.
        hashes: Vec<B256>,
        /// One slot per requested hash.
        receipts: Vec<Option<Vec<Receipt>>>,
    },
    /// The state of one account at several blocks.
    Accounts {
        /// The account address.
        address: Address,
        /// The block hashes to query at.
        hashes: Vec<B256>,
        /// The trusted state root of each block, supplied by the caller and
        /// aligned with `hashes`.
        state_roots: Vec<B256>,
        /// One slot per requested block.
        accounts: Vec<Option<Account>>,
    },
    /// Transaction status by hash.
    TxStatuses {
        /// The transaction hashes to query.
        hashes: Vec<B256>,
        /// One slot per requested hash. Slots a peer silently dropped are
        /// labeled [`TransactionStatus::Unknown`] on completion.
        statuses: Vec<Option<TransactionStatus>>,
    },
    /// Relay one signed transaction, then query its status.
    SubmitTransaction {
        /// The raw signed transaction.
        transaction: RlpItem,
        /// Its hash, used for the follow-up status query.
        hash: B256,
        /// The status reported after the relay.
        status: Option<TransactionStatus>,
    },
}

impl Provision {
    /// The wire request kind this provision maps to.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Headers { .. } => RequestKind::Headers,
            Self::BlockProofs { .. } => RequestKind::HeaderProofs,
            Self::Bodies { .. } => RequestKind::Bodies,
            Self::Receipts { .. } => RequestKind::Receipts,
            Self::Accounts { .. } => RequestKind::Proofs,
            Self::TxStatuses { .. } => RequestKind::TransactionStatus,
            Self::SubmitTransaction { .. } => RequestKind::SendTransactions,
        }
    }

    /// The number of items requested.
    pub fn request_size(&self) -> usize {
        match self {
            Self::Headers { max, .. } => *max,
            Self::BlockProofs { numbers, .. } => numbers.len(),
            Self::Bodies { hashes, .. } => hashes.len(),
            Self::Receipts { hashes, .. } => hashes.len(),
            Self::Accounts { hashes, .. } => hashes.len(),
            Self::TxStatuses { hashes, .. } => hashes.len(),
            Self::SubmitTransaction { .. } => 1,
        }
    }

    /// Pre-sizes the response slots to the request size. Called exactly once
    /// before the first message goes out.
    pub(crate) fn reserve(&mut self) {
        let size = self.request_size();
        match self {
            Self::Headers { headers, .. } => headers.resize(size, None),
            Self::BlockProofs { proofs, .. } => proofs.resize(size, None),
            Self::Bodies { bodies, .. } => bodies.resize(size, None),
            Self::Receipts { receipts, .. } => receipts.resize(size, None),
            Self::Accounts { accounts, .. } => accounts.resize(size, None),
            Self::TxStatuses { statuses, .. } => statuses.resize(size, None),
            Self::SubmitTransaction { status, .. } => *status = None,
        }
    }

    /// Creates a headers provision.
    pub fn headers(start: u64, skip: u64, max: usize, reverse: bool) -> Self {
        Self::Headers { start, skip, max, reverse, headers: Vec::new() }
    }

    /// Creates a block-proofs provision.
    pub fn block_proofs(numbers: Vec<u64>, cht_root: Option<B256>) -> Self {
        Self::BlockProofs { numbers, cht_root, proofs: Vec::new() }
    }

    /// Creates a bodies provision.
    pub fn bodies(hashes: Vec<B256>) -> Self {
        Self::Bodies { hashes, bodies: Vec::new() }
    }

    /// Creates a receipts provision.
    pub fn receipts(hashes: Vec<B256>) -> Self {
        Self::Receipts { hashes, receipts: Vec::new() }
    }

    /// Creates an accounts provision. `state_roots` must align with
    /// `hashes`; they are the trusted roots proofs are checked against.
    pub fn accounts(address: Address, hashes: Vec<B256>, state_roots: Vec<B256>) -> Self {
        Self::Accounts { address, hashes, state_roots, accounts: Vec::new() }
    }

    /// Creates a transaction-status provision.
    pub fn tx_statuses(hashes: Vec<B256>) -> Self {
        Self::TxStatuses { hashes, statuses: Vec::new() }
    }

    /// Creates a submit-transaction provision. The hash is the transaction
    /// hash used for the follow-up status query.
    pub fn submit_transaction(transaction: RlpItem, hash: B256) -> Self {
        Self::SubmitTransaction { transaction, hash, status: None }
    }
}

/// The completion of one provision, delivered to the caller.
#[derive(Debug)]
pub struct ProvisionResult {
    /// The caller-level identifier the provision was submitted under.
    pub id: ProvisionId,
    /// The node that served (or failed) the provision, when one was
    /// assigned.
    pub peer: Option<PeerId>,
    /// The assembled provision, or why it failed.
    pub result: Result<Provision, ProvisionError>,
}
