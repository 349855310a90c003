use alloy_primitives::B256;
use alloy_rlp::{length_of_length, Decodable, Encodable, RlpDecodable, RlpEncodable};
use bytes::BufMut;

/// Where an included transaction landed on chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransactionIndex {
    /// Hash of the including block.
    pub block_hash: B256,
    /// Number of the including block.
    pub block_number: u64,
    /// Position of the transaction within the block.
    pub transaction_index: u64,
}

/// The lifecycle state a peer reports for a transaction hash.
///
/// Wire form is `[code]`, `[code, [block_hash, block_number, index]]` for
/// `Included` and `[code, message]` for `Error`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransactionStatus {
    /// The peer has never seen the transaction.
    ///
    /// Also used for slots a peer silently dropped from its response.
    #[default]
    Unknown,
    /// Queued, not yet processable.
    Queued,
    /// Pending inclusion.
    Pending,
    /// Included in a block.
    Included(TransactionIndex),
    /// Rejected by the peer.
    Error(String),
}

impl TransactionStatus {
    const UNKNOWN: u8 = 0;
    const QUEUED: u8 = 1;
    const PENDING: u8 = 2;
    const INCLUDED: u8 = 3;
    const ERROR: u8 = 4;

    fn code(&self) -> u8 {
        match self {
            Self::Unknown => Self::UNKNOWN,
            Self::Queued => Self::QUEUED,
            Self::Pending => Self::PENDING,
            Self::Included(_) => Self::INCLUDED,
            Self::Error(_) => Self::ERROR,
        }
    }

    fn payload_length(&self) -> usize {
        let mut length = self.code().length();
        match self {
            Self::Included(index) => length += index.length(),
            Self::Error(message) => length += message.as_str().length(),
            _ => {}
        }
        length
    }
}

impl Encodable for TransactionStatus {
    fn encode(&self, out: &mut dyn BufMut) {
        let payload_length = self.payload_length();
        alloy_rlp::Header { list: true, payload_length }.encode(out);
        self.code().encode(out);
        match self {
            Self::Included(index) => index.encode(out),
            Self::Error(message) => message.as_str().encode(out),
            _ => {}
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

impl Decodable for TransactionStatus {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let list_header = alloy_rlp::Header::decode(buf)?;
        if !list_header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        let code: u8 = Decodable::decode(buf)?;
        match code {
            Self::UNKNOWN => Ok(Self::Unknown),
            Self::QUEUED => Ok(Self::Queued),
            Self::PENDING => Ok(Self::Pending),
            Self::INCLUDED => Ok(Self::Included(Decodable::decode(buf)?)),
            Self::ERROR => {
                let message: String = Decodable::decode(buf)?;
                Ok(Self::Error(message))
            }
            _ => Err(alloy_rlp::Error::Custom("unknown transaction status code")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        let statuses = [
            TransactionStatus::Unknown,
            TransactionStatus::Queued,
            TransactionStatus::Pending,
            TransactionStatus::Included(TransactionIndex {
                block_hash: B256::repeat_byte(0x42),
                block_number: 4_732_522,
                transaction_index: 3,
            }),
            TransactionStatus::Error("known transaction".to_string()),
        ];

        for status in statuses {
            let mut encoded = Vec::new();
            status.encode(&mut encoded);
            assert_eq!(encoded.len(), status.length());
            assert_eq!(TransactionStatus::decode(&mut encoded.as_slice()).unwrap(), status);
        }
    }

    #[test]
    fn rejects_unknown_code() {
        // [ 9 ]
        let encoded = [0xc1, 0x09];
        assert!(TransactionStatus::decode(&mut &encoded[..]).is_err());
    }
}
