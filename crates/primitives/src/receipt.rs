use alloy_primitives::{Address, Bloom, Bytes, B256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// A log emitted during transaction execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Log {
    /// Address of the emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Unindexed payload.
    pub data: Bytes,
}

/// A transaction receipt as served to light clients.
///
/// Encoded in the post-Byzantium form where the first element is the status
/// flag rather than an intermediate state root.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Receipt {
    /// Whether the transaction succeeded.
    pub success: bool,
    /// Gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Bloom filter over the receipt's logs.
    pub bloom: Bloom,
    /// Logs emitted by the transaction.
    pub logs: Vec<Log>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_rlp::{Decodable, Encodable};

    #[test]
    fn receipt_rlp_round_trip() {
        let receipt = Receipt {
            success: true,
            cumulative_gas_used: 21_000,
            bloom: Bloom::default(),
            logs: vec![Log {
                address: Address::repeat_byte(0xaa),
                topics: vec![B256::repeat_byte(0x01)],
                data: Bytes::from_static(&[0xde, 0xad]),
            }],
        };
        let mut encoded = Vec::new();
        receipt.encode(&mut encoded);
        assert_eq!(Receipt::decode(&mut encoded.as_slice()).unwrap(), receipt);
    }
}
