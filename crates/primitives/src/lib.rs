#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Chain data types shared across the lantern light client: block headers,
//! account snapshots, receipts, transaction status and peer records.

mod account;
mod header;
mod node_record;
mod receipt;
mod transaction;

pub use account::Account;
pub use header::{BlockBody, Header, RlpItem};
pub use node_record::{NodeRecord, NodeRecordParseError};
pub use receipt::{Log, Receipt};
pub use transaction::{TransactionIndex, TransactionStatus};

pub use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B512, U256};

/// A peer's identity: the uncompressed secp256k1 public key without the
/// leading tag byte.
pub type PeerId = B512;
