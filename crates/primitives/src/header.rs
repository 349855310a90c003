use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{length_of_length, Decodable, Encodable, RlpDecodable, RlpEncodable};
use bytes::BufMut;

/// A block header as served to light clients.
///
/// The optional `base_fee_per_gas` field is only present for post-London
/// headers and is encoded as a trailing list element, so encoding is done by
/// hand rather than derived.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Header {
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Hash of the ommers list.
    pub ommers_hash: B256,
    /// Address that receives the block reward.
    pub beneficiary: Address,
    /// State trie root after this block.
    pub state_root: B256,
    /// Transactions trie root.
    pub transactions_root: B256,
    /// Receipts trie root.
    pub receipts_root: B256,
    /// Bloom filter over the logs of the block.
    pub logs_bloom: Bloom,
    /// Proof-of-work difficulty.
    pub difficulty: U256,
    /// Block number.
    pub number: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas used by all transactions in the block.
    pub gas_used: u64,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Arbitrary extra data, at most 32 bytes.
    pub extra_data: Bytes,
    /// Proof-of-work mix hash.
    pub mix_hash: B256,
    /// Proof-of-work nonce.
    pub nonce: B64,
    /// EIP-1559 base fee, present from the London fork onwards.
    pub base_fee_per_gas: Option<u64>,
}

impl Header {
    /// Computes the block hash by hashing the RLP encoding of the header.
    pub fn hash_slow(&self) -> B256 {
        let mut out = Vec::with_capacity(self.length());
        self.encode(&mut out);
        keccak256(&out)
    }

    fn payload_length(&self) -> usize {
        let mut length = 0;
        length += self.parent_hash.length();
        length += self.ommers_hash.length();
        length += self.beneficiary.length();
        length += self.state_root.length();
        length += self.transactions_root.length();
        length += self.receipts_root.length();
        length += self.logs_bloom.length();
        length += self.difficulty.length();
        length += self.number.length();
        length += self.gas_limit.length();
        length += self.gas_used.length();
        length += self.timestamp.length();
        length += self.extra_data.length();
        length += self.mix_hash.length();
        length += self.nonce.length();
        if let Some(base_fee) = self.base_fee_per_gas {
            length += base_fee.length();
        }
        length
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn BufMut) {
        let list_header =
            alloy_rlp::Header { list: true, payload_length: self.payload_length() };
        list_header.encode(out);

        self.parent_hash.encode(out);
        self.ommers_hash.encode(out);
        self.beneficiary.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.logs_bloom.encode(out);
        self.difficulty.encode(out);
        self.number.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.timestamp.encode(out);
        self.extra_data.encode(out);
        self.mix_hash.encode(out);
        self.nonce.encode(out);
        if let Some(base_fee) = self.base_fee_per_gas {
            base_fee.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

impl Decodable for Header {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let list_header = alloy_rlp::Header::decode(buf)?;
        if !list_header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let started_len = buf.len();

        let mut this = Self {
            parent_hash: Decodable::decode(buf)?,
            ommers_hash: Decodable::decode(buf)?,
            beneficiary: Decodable::decode(buf)?,
            state_root: Decodable::decode(buf)?,
            transactions_root: Decodable::decode(buf)?,
            receipts_root: Decodable::decode(buf)?,
            logs_bloom: Decodable::decode(buf)?,
            difficulty: Decodable::decode(buf)?,
            number: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            gas_used: Decodable::decode(buf)?,
            timestamp: Decodable::decode(buf)?,
            extra_data: Decodable::decode(buf)?,
            mix_hash: Decodable::decode(buf)?,
            nonce: Decodable::decode(buf)?,
            base_fee_per_gas: None,
        };

        let consumed = started_len - buf.len();
        if consumed < list_header.payload_length {
            this.base_fee_per_gas = Some(Decodable::decode(buf)?);
        }

        let consumed = started_len - buf.len();
        if consumed != list_header.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: list_header.payload_length,
                got: consumed,
            })
        }
        Ok(this)
    }
}

/// A single RLP item carried through without interpretation.
///
/// Light clients relay transactions they do not execute; the body codec keeps
/// them as the exact bytes the peer sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RlpItem(pub Bytes);

impl Encodable for RlpItem {
    fn encode(&self, out: &mut dyn BufMut) {
        out.put_slice(&self.0);
    }

    fn length(&self) -> usize {
        self.0.len()
    }
}

impl Decodable for RlpItem {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut peek = *buf;
        let item_header = alloy_rlp::Header::decode(&mut peek)?;
        let header_len = buf.len() - peek.len();
        let total = header_len + item_header.payload_length;
        if buf.len() < total {
            return Err(alloy_rlp::Error::InputTooShort)
        }
        let item = Bytes::copy_from_slice(&buf[..total]);
        *buf = &buf[total..];
        Ok(Self(item))
    }
}

/// The transactions and ommers of a block, as served to light clients.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockBody {
    /// Transactions in the block, kept as raw RLP items.
    pub transactions: Vec<RlpItem>,
    /// Ommer headers.
    pub ommers: Vec<Header>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn header_rlp_round_trip() {
        let header = Header {
            number: 4_732_522,
            gas_limit: 8_000_000,
            gas_used: 7_996_524,
            difficulty: U256::from(2_993_644_752_527_613u64),
            timestamp: 1_513_279_817,
            extra_data: Bytes::from_static(b"lantern"),
            base_fee_per_gas: None,
            ..Default::default()
        };

        let mut encoded = Vec::new();
        header.encode(&mut encoded);
        assert_eq!(encoded.len(), header.length());

        let decoded = Header::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_rlp_round_trip_with_base_fee() {
        let header = Header {
            number: 12_965_000,
            base_fee_per_gas: Some(1_000_000_000),
            ..Default::default()
        };

        let mut encoded = Vec::new();
        header.encode(&mut encoded);
        let decoded = Header::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded.base_fee_per_gas, Some(1_000_000_000));
        assert_eq!(decoded, header);
    }

    #[test]
    fn hash_changes_with_contents() {
        let a = Header { number: 1, ..Default::default() };
        let b = Header { number: 2, ..Default::default() };
        assert_ne!(a.hash_slow(), b.hash_slow());
    }

    #[test]
    fn raw_item_keeps_exact_bytes() {
        // a two element list: [ 0x01, "ab" ]
        let raw = hex!("c401826162");
        // decoding must consume the entire item, not just its header
        let mut buf = &raw[..];
        let item = RlpItem::decode(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(item.0.as_ref(), &raw[..]);

        let mut out = Vec::new();
        item.encode(&mut out);
        assert_eq!(out, raw);
    }
}
