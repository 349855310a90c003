//! The PIP wire codec: requests ride in typed batch envelopes and there are
//! no per-message item caps, so one logical request is always one wire
//! message.

use crate::{
    errors::LightStreamError,
    message::{LightMessage, RequestKind, RequestPair, ResponsePair},
    status::LightStatus,
};
use alloy_rlp::{length_of_length, Decodable, Encodable, EMPTY_STRING_CODE};
use bytes::{Buf, BufMut};

/// Message ids of the PIP family, relative to the capability offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PipMessageId {
    Status = 0x00,
    Announce = 0x01,
    Request = 0x02,
    Response = 0x03,
    RelayTransactions = 0x06,
}

impl TryFrom<u8> for PipMessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Status),
            0x01 => Ok(Self::Announce),
            0x02 => Ok(Self::Request),
            0x03 => Ok(Self::Response),
            0x06 => Ok(Self::RelayTransactions),
            _ => Err(value),
        }
    }
}

/// Typed-entry discriminators inside a request or response batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum EntryKind {
    Headers = 0,
    HeaderProof = 1,
    TransactionIndex = 2,
    Receipts = 3,
    Body = 4,
    Account = 5,
}

impl TryFrom<u64> for EntryKind {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Headers),
            1 => Ok(Self::HeaderProof),
            2 => Ok(Self::TransactionIndex),
            3 => Ok(Self::Receipts),
            4 => Ok(Self::Body),
            5 => Ok(Self::Account),
            _ => Err(value),
        }
    }
}

/// Batching makes item caps unnecessary: a request of any size fits one
/// message.
pub const fn content_limit(_kind: RequestKind) -> usize {
    usize::MAX
}

/// One `[kind, payload]` entry of a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry<T> {
    kind: u64,
    payload: T,
}

impl<T: Encodable> Encodable for Entry<T> {
    fn encode(&self, out: &mut dyn BufMut) {
        let payload_length = self.kind.length() + self.payload.length();
        alloy_rlp::Header { list: true, payload_length }.encode(out);
        self.kind.encode(out);
        self.payload.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.kind.length() + self.payload.length();
        payload_length + length_of_length(payload_length)
    }
}

impl<T: Decodable> Decodable for Entry<T> {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = alloy_rlp::Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        Ok(Self { kind: Decodable::decode(buf)?, payload: Decodable::decode(buf)? })
    }
}

fn entries<T: Clone>(kind: EntryKind, items: &[T]) -> Vec<Entry<T>> {
    items.iter().map(|item| Entry { kind: kind as u64, payload: item.clone() }).collect()
}

fn unwrap_entries<T>(kind: EntryKind, entries: Vec<Entry<T>>) -> Result<Vec<T>, LightStreamError> {
    entries
        .into_iter()
        .map(|entry| {
            (entry.kind == kind as u64)
                .then_some(entry.payload)
                .ok_or(LightStreamError::InvalidMessage("mixed entry kinds in batch"))
        })
        .collect()
}

/// Peeks the entry kind of the first batch entry without consuming input.
fn peek_entry_kind(buf: &[u8]) -> Result<EntryKind, LightStreamError> {
    let mut rest = buf;
    // [request_id, (buffer_value,) [ [kind, payload], ... ]]
    let outer = alloy_rlp::Header::decode(&mut rest)?;
    if !outer.list {
        return Err(LightStreamError::InvalidMessage("expected batch list"))
    }
    let _request_id = u64::decode(&mut rest)?;

    // responses carry a buffer value between the id and the batch
    let mut probe = rest;
    let next = alloy_rlp::Header::decode(&mut probe)?;
    if !next.list {
        let _buffer_value = u64::decode(&mut rest)?;
    }

    let batch = alloy_rlp::Header::decode(&mut rest)?;
    if !batch.list || batch.payload_length == 0 {
        return Err(LightStreamError::InvalidMessage("empty batch"))
    }
    let entry = alloy_rlp::Header::decode(&mut rest)?;
    if !entry.list {
        return Err(LightStreamError::InvalidMessage("expected batch entry"))
    }
    let kind = u64::decode(&mut rest)?;
    EntryKind::try_from(kind).map_err(|_| LightStreamError::InvalidMessage("unknown entry kind"))
}

/// Encodes `message` as its absolute message id byte followed by the RLP
/// body.
pub fn encode(message: &LightMessage, offset: u8, out: &mut dyn BufMut) {
    let id = |id: PipMessageId| -> u8 { offset + id as u8 };
    match message {
        LightMessage::Status(status) => {
            id(PipMessageId::Status).encode(out);
            status.encode(out);
        }
        LightMessage::Announce(announce) => {
            id(PipMessageId::Announce).encode(out);
            announce.encode(out);
        }
        LightMessage::GetBlockHeaders(pair) => {
            id(PipMessageId::Request).encode(out);
            RequestPair {
                request_id: pair.request_id,
                message: vec![Entry { kind: EntryKind::Headers as u64, payload: pair.message }],
            }
            .encode(out);
        }
        LightMessage::BlockHeaders(pair) => {
            id(PipMessageId::Response).encode(out);
            ResponsePair {
                request_id: pair.request_id,
                buffer_value: pair.buffer_value,
                message: vec![Entry {
                    kind: EntryKind::Headers as u64,
                    payload: pair.message.clone(),
                }],
            }
            .encode(out);
        }
        LightMessage::GetBlockBodies(pair) => {
            id(PipMessageId::Request).encode(out);
            RequestPair {
                request_id: pair.request_id,
                message: entries(EntryKind::Body, &pair.message),
            }
            .encode(out);
        }
        LightMessage::BlockBodies(pair) => {
            id(PipMessageId::Response).encode(out);
            ResponsePair {
                request_id: pair.request_id,
                buffer_value: pair.buffer_value,
                message: entries(EntryKind::Body, &pair.message),
            }
            .encode(out);
        }
        LightMessage::GetReceipts(pair) => {
            id(PipMessageId::Request).encode(out);
            RequestPair {
                request_id: pair.request_id,
                message: entries(EntryKind::Receipts, &pair.message),
            }
            .encode(out);
        }
        LightMessage::Receipts(pair) => {
            id(PipMessageId::Response).encode(out);
            ResponsePair {
                request_id: pair.request_id,
                buffer_value: pair.buffer_value,
                message: entries(EntryKind::Receipts, &pair.message),
            }
            .encode(out);
        }
        LightMessage::GetProofs(pair) => {
            id(PipMessageId::Request).encode(out);
            RequestPair {
                request_id: pair.request_id,
                message: entries(EntryKind::Account, &pair.message),
            }
            .encode(out);
        }
        LightMessage::Proofs(pair) => {
            id(PipMessageId::Response).encode(out);
            ResponsePair {
                request_id: pair.request_id,
                buffer_value: pair.buffer_value,
                message: entries(EntryKind::Account, &pair.message),
            }
            .encode(out);
        }
        LightMessage::GetHeaderProofs(pair) => {
            id(PipMessageId::Request).encode(out);
            RequestPair {
                request_id: pair.request_id,
                message: entries(EntryKind::HeaderProof, &pair.message),
            }
            .encode(out);
        }
        LightMessage::HeaderProofs(pair) => {
            id(PipMessageId::Response).encode(out);
            ResponsePair {
                request_id: pair.request_id,
                buffer_value: pair.buffer_value,
                message: entries(EntryKind::HeaderProof, &pair.message),
            }
            .encode(out);
        }
        LightMessage::SendTransactions(pair) => {
            id(PipMessageId::RelayTransactions).encode(out);
            pair.encode(out);
        }
        LightMessage::GetTransactionStatus(pair) => {
            id(PipMessageId::Request).encode(out);
            RequestPair {
                request_id: pair.request_id,
                message: entries(EntryKind::TransactionIndex, &pair.message),
            }
            .encode(out);
        }
        LightMessage::TransactionStatus(pair) => {
            id(PipMessageId::Response).encode(out);
            ResponsePair {
                request_id: pair.request_id,
                buffer_value: pair.buffer_value,
                message: entries(EntryKind::TransactionIndex, &pair.message),
            }
            .encode(out);
        }
    }
}

/// Decodes a message from its absolute message id byte and RLP body.
pub fn decode(offset: u8, buf: &mut &[u8]) -> Result<LightMessage, LightStreamError> {
    if buf.is_empty() {
        return Err(LightStreamError::InvalidMessage("empty message"))
    }
    let absolute = if buf[0] == EMPTY_STRING_CODE { 0 } else { buf[0] };
    let relative =
        absolute.checked_sub(offset).ok_or(LightStreamError::InvalidMessageId(absolute))?;
    let id = PipMessageId::try_from(relative)
        .map_err(|_| LightStreamError::InvalidMessageId(absolute))?;
    buf.advance(1);

    let message = match id {
        PipMessageId::Status => LightMessage::Status(LightStatus::decode(buf)?),
        PipMessageId::Announce => LightMessage::Announce(Decodable::decode(buf)?),
        PipMessageId::RelayTransactions => {
            LightMessage::SendTransactions(Decodable::decode(buf)?)
        }
        PipMessageId::Request => match peek_entry_kind(buf)? {
            EntryKind::Headers => {
                let pair: RequestPair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                let mut message = unwrap_entries(EntryKind::Headers, pair.message)?;
                let message = message
                    .pop()
                    .ok_or(LightStreamError::InvalidMessage("empty batch"))?;
                LightMessage::GetBlockHeaders(RequestPair {
                    request_id: pair.request_id,
                    message,
                })
            }
            EntryKind::Body => {
                let pair: RequestPair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::GetBlockBodies(RequestPair {
                    request_id: pair.request_id,
                    message: unwrap_entries(EntryKind::Body, pair.message)?,
                })
            }
            EntryKind::Receipts => {
                let pair: RequestPair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::GetReceipts(RequestPair {
                    request_id: pair.request_id,
                    message: unwrap_entries(EntryKind::Receipts, pair.message)?,
                })
            }
            EntryKind::Account => {
                let pair: RequestPair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::GetProofs(RequestPair {
                    request_id: pair.request_id,
                    message: unwrap_entries(EntryKind::Account, pair.message)?,
                })
            }
            EntryKind::HeaderProof => {
                let pair: RequestPair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::GetHeaderProofs(RequestPair {
                    request_id: pair.request_id,
                    message: unwrap_entries(EntryKind::HeaderProof, pair.message)?,
                })
            }
            EntryKind::TransactionIndex => {
                let pair: RequestPair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::GetTransactionStatus(RequestPair {
                    request_id: pair.request_id,
                    message: unwrap_entries(EntryKind::TransactionIndex, pair.message)?,
                })
            }
        },
        PipMessageId::Response => match peek_entry_kind(buf)? {
            EntryKind::Headers => {
                let pair: ResponsePair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                let mut message = unwrap_entries(EntryKind::Headers, pair.message)?;
                let message = message
                    .pop()
                    .ok_or(LightStreamError::InvalidMessage("empty batch"))?;
                LightMessage::BlockHeaders(ResponsePair {
                    request_id: pair.request_id,
                    buffer_value: pair.buffer_value,
                    message,
                })
            }
            EntryKind::Body => {
                let pair: ResponsePair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::BlockBodies(ResponsePair {
                    request_id: pair.request_id,
                    buffer_value: pair.buffer_value,
                    message: unwrap_entries(EntryKind::Body, pair.message)?,
                })
            }
            EntryKind::Receipts => {
                let pair: ResponsePair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::Receipts(ResponsePair {
                    request_id: pair.request_id,
                    buffer_value: pair.buffer_value,
                    message: unwrap_entries(EntryKind::Receipts, pair.message)?,
                })
            }
            EntryKind::Account => {
                let pair: ResponsePair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::Proofs(ResponsePair {
                    request_id: pair.request_id,
                    buffer_value: pair.buffer_value,
                    message: unwrap_entries(EntryKind::Account, pair.message)?,
                })
            }
            EntryKind::HeaderProof => {
                let pair: ResponsePair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::HeaderProofs(ResponsePair {
                    request_id: pair.request_id,
                    buffer_value: pair.buffer_value,
                    message: unwrap_entries(EntryKind::HeaderProof, pair.message)?,
                })
            }
            EntryKind::TransactionIndex => {
                let pair: ResponsePair<Vec<Entry<_>>> = Decodable::decode(buf)?;
                LightMessage::TransactionStatus(ResponsePair {
                    request_id: pair.request_id,
                    buffer_value: pair.buffer_value,
                    message: unwrap_entries(EntryKind::TransactionIndex, pair.message)?,
                })
            }
        },
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use lantern_primitives::TransactionStatus;

    #[test]
    fn request_batch_round_trip() {
        let message = LightMessage::GetBlockBodies(RequestPair {
            request_id: 9,
            message: vec![B256::repeat_byte(0x01), B256::repeat_byte(0x02)],
        });
        let mut buf = Vec::new();
        encode(&message, 0x10, &mut buf);
        assert_eq!(buf[0], 0x12);
        assert_eq!(decode(0x10, &mut buf.as_slice()).unwrap(), message);
    }

    #[test]
    fn response_batch_round_trip() {
        let message = LightMessage::TransactionStatus(ResponsePair {
            request_id: 9,
            buffer_value: 77,
            message: vec![TransactionStatus::Queued, TransactionStatus::Unknown],
        });
        let mut buf = Vec::new();
        encode(&message, 0x10, &mut buf);
        assert_eq!(decode(0x10, &mut buf.as_slice()).unwrap(), message);
    }

    #[test]
    fn relay_has_its_own_message_id() {
        let message = LightMessage::SendTransactions(RequestPair {
            request_id: 3,
            message: vec![lantern_primitives::RlpItem(alloy_primitives::Bytes::from_static(
                &[0x01],
            ))],
        });
        let mut buf = Vec::new();
        encode(&message, 0x10, &mut buf);
        assert_eq!(buf[0], 0x16);
        assert_eq!(decode(0x10, &mut buf.as_slice()).unwrap(), message);
    }

    #[test]
    fn headers_request_is_a_single_entry_batch() {
        use crate::message::GetBlockHeaders;
        let message = LightMessage::GetBlockHeaders(RequestPair {
            request_id: 1,
            message: GetBlockHeaders {
                origin: 100u64.into(),
                max: 500,
                skip: 1,
                reverse: true,
            },
        });
        let mut buf = Vec::new();
        encode(&message, 0x10, &mut buf);
        assert_eq!(decode(0x10, &mut buf.as_slice()).unwrap(), message);
    }
}
