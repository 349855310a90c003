//! Protocol-neutral message types for the light client request kinds.
//!
//! Both wire families expose the same logical operations; the per-family
//! codecs in [`les`](crate::les) and [`pip`](crate::pip) map these to their
//! respective encodings.

use crate::status::LightStatus;
use alloy_primitives::{Bytes, B256, U256};
use alloy_rlp::{length_of_length, Decodable, Encodable, RlpDecodable, RlpEncodable};
use bytes::BufMut;
use lantern_primitives::{BlockBody, Header, Receipt, RlpItem, TransactionStatus};

/// Either a block hash or a block number, as a request origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HashOrNumber {
    /// A block hash
    Hash(B256),
    /// A block number
    Number(u64),
}

impl From<B256> for HashOrNumber {
    fn from(value: B256) -> Self {
        Self::Hash(value)
    }
}

impl From<u64> for HashOrNumber {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl Encodable for HashOrNumber {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            Self::Hash(hash) => hash.encode(out),
            Self::Number(number) => number.encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Hash(hash) => hash.length(),
            Self::Number(number) => number.length(),
        }
    }
}

impl Decodable for HashOrNumber {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut peek = *buf;
        let header = alloy_rlp::Header::decode(&mut peek)?;
        // a hash is always exactly a 32 byte string, everything shorter is a
        // number
        if !header.list && header.payload_length == 32 {
            Ok(Self::Hash(B256::decode(buf)?))
        } else {
            Ok(Self::Number(u64::decode(buf)?))
        }
    }
}

/// A request for a window of consecutive headers: `max` headers starting at
/// `origin`, each `skip + 1` blocks apart, walking backwards if `reverse`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GetBlockHeaders {
    /// The block to start from.
    pub origin: HashOrNumber,
    /// Maximum number of headers wanted.
    pub max: u64,
    /// Blocks skipped between consecutive headers.
    pub skip: u64,
    /// Walk towards genesis instead of towards the head.
    pub reverse: bool,
}

/// A state proof request: the trie path for `key` in the state identified by
/// `block_hash`, optionally descending into the storage trie of
/// `account_key`.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProofRequest {
    /// Block whose post-state is being proven against.
    pub block_hash: B256,
    /// Hashed account address for storage proofs, empty for account proofs.
    pub account_key: Bytes,
    /// Hashed key being proven.
    pub key: B256,
    /// Proof nodes above this trie level may be omitted.
    pub from_level: u64,
}

/// The ordered node list of one merkle proof, each node kept as raw RLP.
pub type ProofNodes = Vec<Bytes>;

/// A request to prove an old header through the canonical hash trie.
#[derive(Clone, Copy, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeaderProofRequest {
    /// Index of the canonical hash trie section.
    pub cht_number: u64,
    /// Block number whose hash is being proven.
    pub block_number: u64,
}

/// The proven hash and total difficulty of an old header, with the trie path
/// backing it.
#[derive(Clone, Debug, PartialEq, Eq, RlpDecodable, RlpEncodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeaderProof {
    /// The proven block hash.
    pub block_hash: B256,
    /// The proven total difficulty at that block.
    pub total_difficulty: U256,
    /// The canonical hash trie path for the block number.
    pub proof: ProofNodes,
}

/// A new-head announcement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Announce {
    /// Hash of the new head.
    pub head_hash: B256,
    /// Number of the new head.
    pub head_number: u64,
    /// Total difficulty at the new head.
    pub head_td: U256,
    /// How many blocks were rewound before this head, zero for plain
    /// extensions.
    pub reorg_depth: u64,
}

/// A request wrapped with the wire request id used to match its response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestPair<T> {
    /// id used to identify the request
    pub request_id: u64,
    /// the request being wrapped
    pub message: T,
}

impl<T> Encodable for RequestPair<T>
where
    T: Encodable,
{
    fn encode(&self, out: &mut dyn BufMut) {
        let payload_length = self.request_id.length() + self.message.length();
        alloy_rlp::Header { list: true, payload_length }.encode(out);
        self.request_id.encode(out);
        self.message.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.request_id.length() + self.message.length();
        payload_length + length_of_length(payload_length)
    }
}

impl<T> Decodable for RequestPair<T>
where
    T: Decodable,
{
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        Ok(Self { request_id: Decodable::decode(buf)?, message: Decodable::decode(buf)? })
    }
}

/// A response wrapped with its request id and the server's flow control
/// buffer value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponsePair<T> {
    /// id of the request this responds to
    pub request_id: u64,
    /// the server's remaining credit allowance for us, echoed on every
    /// response
    pub buffer_value: u64,
    /// the response being wrapped
    pub message: T,
}

impl<T> Encodable for ResponsePair<T>
where
    T: Encodable,
{
    fn encode(&self, out: &mut dyn BufMut) {
        let payload_length =
            self.request_id.length() + self.buffer_value.length() + self.message.length();
        alloy_rlp::Header { list: true, payload_length }.encode(out);
        self.request_id.encode(out);
        self.buffer_value.encode(out);
        self.message.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length =
            self.request_id.length() + self.buffer_value.length() + self.message.length();
        payload_length + length_of_length(payload_length)
    }
}

impl<T> Decodable for ResponsePair<T>
where
    T: Decodable,
{
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        Ok(Self {
            request_id: Decodable::decode(buf)?,
            buffer_value: Decodable::decode(buf)?,
            message: Decodable::decode(buf)?,
        })
    }
}

/// The seven logical request kinds a light connection can issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// A window of consecutive headers.
    Headers,
    /// Canonical-hash-trie proofs for old headers.
    HeaderProofs,
    /// Block bodies by hash.
    Bodies,
    /// Per-block receipt lists by hash.
    Receipts,
    /// State proofs.
    Proofs,
    /// Transaction status by hash.
    TransactionStatus,
    /// Raw transaction relay.
    SendTransactions,
}

/// All messages a light connection exchanges after Hello, independent of the
/// negotiated wire family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LightMessage {
    /// The sub-protocol handshake announcement.
    Status(LightStatus),
    /// A new-head announcement.
    Announce(Announce),
    /// Request a window of headers.
    GetBlockHeaders(RequestPair<GetBlockHeaders>),
    /// Response to [`LightMessage::GetBlockHeaders`].
    BlockHeaders(ResponsePair<Vec<Header>>),
    /// Request block bodies by hash.
    GetBlockBodies(RequestPair<Vec<B256>>),
    /// Response to [`LightMessage::GetBlockBodies`].
    BlockBodies(ResponsePair<Vec<BlockBody>>),
    /// Request per-block receipt lists by hash.
    GetReceipts(RequestPair<Vec<B256>>),
    /// Response to [`LightMessage::GetReceipts`].
    Receipts(ResponsePair<Vec<Vec<Receipt>>>),
    /// Request state proofs.
    GetProofs(RequestPair<Vec<ProofRequest>>),
    /// Response to [`LightMessage::GetProofs`]: one node path per request.
    Proofs(ResponsePair<Vec<ProofNodes>>),
    /// Request canonical-hash-trie proofs for old headers.
    GetHeaderProofs(RequestPair<Vec<HeaderProofRequest>>),
    /// Response to [`LightMessage::GetHeaderProofs`].
    HeaderProofs(ResponsePair<Vec<HeaderProof>>),
    /// Relay raw signed transactions.
    SendTransactions(RequestPair<Vec<RlpItem>>),
    /// Query the status of transactions by hash.
    GetTransactionStatus(RequestPair<Vec<B256>>),
    /// Response to [`LightMessage::GetTransactionStatus`].
    TransactionStatus(ResponsePair<Vec<TransactionStatus>>),
}

impl LightMessage {
    /// The request id carried by this message, if it is a request or
    /// response.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Self::Status(_) | Self::Announce(_) => None,
            Self::GetBlockHeaders(pair) => Some(pair.request_id),
            Self::BlockHeaders(pair) => Some(pair.request_id),
            Self::GetBlockBodies(pair) => Some(pair.request_id),
            Self::BlockBodies(pair) => Some(pair.request_id),
            Self::GetReceipts(pair) => Some(pair.request_id),
            Self::Receipts(pair) => Some(pair.request_id),
            Self::GetProofs(pair) => Some(pair.request_id),
            Self::Proofs(pair) => Some(pair.request_id),
            Self::GetHeaderProofs(pair) => Some(pair.request_id),
            Self::HeaderProofs(pair) => Some(pair.request_id),
            Self::SendTransactions(pair) => Some(pair.request_id),
            Self::GetTransactionStatus(pair) => Some(pair.request_id),
            Self::TransactionStatus(pair) => Some(pair.request_id),
        }
    }

    /// The flow control buffer value carried by this message, if it is a
    /// response.
    pub fn buffer_value(&self) -> Option<u64> {
        match self {
            Self::BlockHeaders(pair) => Some(pair.buffer_value),
            Self::BlockBodies(pair) => Some(pair.buffer_value),
            Self::Receipts(pair) => Some(pair.buffer_value),
            Self::Proofs(pair) => Some(pair.buffer_value),
            Self::HeaderProofs(pair) => Some(pair.buffer_value),
            Self::TransactionStatus(pair) => Some(pair.buffer_value),
            _ => None,
        }
    }

    /// The number of items requested, used for request cost estimation.
    pub fn request_count(&self) -> Option<usize> {
        match self {
            Self::GetBlockHeaders(pair) => Some(pair.message.max as usize),
            Self::GetBlockBodies(pair) => Some(pair.message.len()),
            Self::GetReceipts(pair) => Some(pair.message.len()),
            Self::GetProofs(pair) => Some(pair.message.len()),
            Self::GetHeaderProofs(pair) => Some(pair.message.len()),
            Self::SendTransactions(pair) => Some(pair.message.len()),
            Self::GetTransactionStatus(pair) => Some(pair.message.len()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_or_number_discriminates_by_length() {
        let cases = [
            HashOrNumber::Hash(B256::repeat_byte(0x7f)),
            HashOrNumber::Number(0),
            HashOrNumber::Number(4_732_522),
            HashOrNumber::Number(u64::MAX),
        ];
        for case in cases {
            let mut buf = Vec::new();
            case.encode(&mut buf);
            assert_eq!(HashOrNumber::decode(&mut buf.as_slice()).unwrap(), case);
        }
    }

    #[test]
    fn request_pair_round_trip() {
        let pair = RequestPair {
            request_id: 1337,
            message: GetBlockHeaders {
                origin: 4_732_522u64.into(),
                max: 192,
                skip: 0,
                reverse: false,
            },
        };
        let mut buf = Vec::new();
        pair.encode(&mut buf);
        assert_eq!(buf.len(), pair.length());
        assert_eq!(
            RequestPair::<GetBlockHeaders>::decode(&mut buf.as_slice()).unwrap(),
            pair
        );
    }

    #[test]
    fn response_pair_round_trip() {
        let pair = ResponsePair {
            request_id: 7,
            buffer_value: 300_000,
            message: vec![TransactionStatus::Queued, TransactionStatus::Unknown],
        };
        let mut buf = Vec::new();
        pair.encode(&mut buf);
        assert_eq!(buf.len(), pair.length());
        assert_eq!(
            ResponsePair::<Vec<TransactionStatus>>::decode(&mut buf.as_slice()).unwrap(),
            pair
        );
    }
}
