//! The LES wire codec: one message id per request and response kind, with
//! the per-message content limits of the Geth light protocol.

use crate::{
    errors::LightStreamError,
    message::{LightMessage, RequestKind},
    status::LightStatus,
};
use alloy_rlp::{Decodable, Encodable, EMPTY_STRING_CODE};
use bytes::{Buf, BufMut};

/// Message ids of the LES family, relative to the capability offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum LesMessageId {
    Status = 0x00,
    Announce = 0x01,
    GetBlockHeaders = 0x02,
    BlockHeaders = 0x03,
    GetBlockBodies = 0x04,
    BlockBodies = 0x05,
    GetReceipts = 0x06,
    Receipts = 0x07,
    GetProofs = 0x0f,
    Proofs = 0x10,
    GetHeaderProofs = 0x11,
    HeaderProofs = 0x12,
    SendTransactions = 0x13,
    GetTransactionStatus = 0x14,
    TransactionStatus = 0x15,
}

impl TryFrom<u8> for LesMessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Status),
            0x01 => Ok(Self::Announce),
            0x02 => Ok(Self::GetBlockHeaders),
            0x03 => Ok(Self::BlockHeaders),
            0x04 => Ok(Self::GetBlockBodies),
            0x05 => Ok(Self::BlockBodies),
            0x06 => Ok(Self::GetReceipts),
            0x07 => Ok(Self::Receipts),
            0x0f => Ok(Self::GetProofs),
            0x10 => Ok(Self::Proofs),
            0x11 => Ok(Self::GetHeaderProofs),
            0x12 => Ok(Self::HeaderProofs),
            0x13 => Ok(Self::SendTransactions),
            0x14 => Ok(Self::GetTransactionStatus),
            0x15 => Ok(Self::TransactionStatus),
            _ => Err(value),
        }
    }
}

/// The LES per-message item caps: one request message may not ask for more
/// than this many items of its kind.
pub const fn content_limit(kind: RequestKind) -> usize {
    match kind {
        RequestKind::Headers => 192,
        RequestKind::HeaderProofs => 64,
        RequestKind::Bodies => 32,
        RequestKind::Receipts => 64,
        RequestKind::Proofs => 64,
        RequestKind::TransactionStatus => 256,
        RequestKind::SendTransactions => 64,
    }
}

/// The capability-relative message id of a [`LightMessage`] in the LES
/// family.
pub fn message_id(message: &LightMessage) -> LesMessageId {
    match message {
        LightMessage::Status(_) => LesMessageId::Status,
        LightMessage::Announce(_) => LesMessageId::Announce,
        LightMessage::GetBlockHeaders(_) => LesMessageId::GetBlockHeaders,
        LightMessage::BlockHeaders(_) => LesMessageId::BlockHeaders,
        LightMessage::GetBlockBodies(_) => LesMessageId::GetBlockBodies,
        LightMessage::BlockBodies(_) => LesMessageId::BlockBodies,
        LightMessage::GetReceipts(_) => LesMessageId::GetReceipts,
        LightMessage::Receipts(_) => LesMessageId::Receipts,
        LightMessage::GetProofs(_) => LesMessageId::GetProofs,
        LightMessage::Proofs(_) => LesMessageId::Proofs,
        LightMessage::GetHeaderProofs(_) => LesMessageId::GetHeaderProofs,
        LightMessage::HeaderProofs(_) => LesMessageId::HeaderProofs,
        LightMessage::SendTransactions(_) => LesMessageId::SendTransactions,
        LightMessage::GetTransactionStatus(_) => LesMessageId::GetTransactionStatus,
        LightMessage::TransactionStatus(_) => LesMessageId::TransactionStatus,
    }
}

/// Encodes `message` as its absolute message id byte followed by the RLP
/// body.
pub fn encode(message: &LightMessage, offset: u8, out: &mut dyn BufMut) {
    let id = offset + message_id(message) as u8;
    id.encode(out);
    match message {
        LightMessage::Status(status) => status.encode(out),
        LightMessage::Announce(announce) => announce.encode(out),
        LightMessage::GetBlockHeaders(pair) => pair.encode(out),
        LightMessage::BlockHeaders(pair) => pair.encode(out),
        LightMessage::GetBlockBodies(pair) => pair.encode(out),
        LightMessage::BlockBodies(pair) => pair.encode(out),
        LightMessage::GetReceipts(pair) => pair.encode(out),
        LightMessage::Receipts(pair) => pair.encode(out),
        LightMessage::GetProofs(pair) => pair.encode(out),
        LightMessage::Proofs(pair) => pair.encode(out),
        LightMessage::GetHeaderProofs(pair) => pair.encode(out),
        LightMessage::HeaderProofs(pair) => pair.encode(out),
        LightMessage::SendTransactions(pair) => pair.encode(out),
        LightMessage::GetTransactionStatus(pair) => pair.encode(out),
        LightMessage::TransactionStatus(pair) => pair.encode(out),
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
    let id = LesMessageId::try_from(relative)
        .map_err(|_| LightStreamError::InvalidMessageId(absolute))?;
    buf.advance(1);

    let message = match id {
        LesMessageId::Status => LightMessage::Status(LightStatus::decode(buf)?),
        LesMessageId::Announce => LightMessage::Announce(Decodable::decode(buf)?),
        LesMessageId::GetBlockHeaders => LightMessage::GetBlockHeaders(Decodable::decode(buf)?),
        LesMessageId::BlockHeaders => LightMessage::BlockHeaders(Decodable::decode(buf)?),
        LesMessageId::GetBlockBodies => LightMessage::GetBlockBodies(Decodable::decode(buf)?),
        LesMessageId::BlockBodies => LightMessage::BlockBodies(Decodable::decode(buf)?),
        LesMessageId::GetReceipts => LightMessage::GetReceipts(Decodable::decode(buf)?),
        LesMessageId::Receipts => LightMessage::Receipts(Decodable::decode(buf)?),
        LesMessageId::GetProofs => LightMessage::GetProofs(Decodable::decode(buf)?),
        LesMessageId::Proofs => LightMessage::Proofs(Decodable::decode(buf)?),
        LesMessageId::GetHeaderProofs => LightMessage::GetHeaderProofs(Decodable::decode(buf)?),
        LesMessageId::HeaderProofs => LightMessage::HeaderProofs(Decodable::decode(buf)?),
        LesMessageId::SendTransactions => LightMessage::SendTransactions(Decodable::decode(buf)?),
        LesMessageId::GetTransactionStatus => {
            LightMessage::GetTransactionStatus(Decodable::decode(buf)?)
        }
        LesMessageId::TransactionStatus => {
            LightMessage::TransactionStatus(Decodable::decode(buf)?)
        }
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{GetBlockHeaders, RequestPair, ResponsePair};
    use alloy_primitives::B256;
    use lantern_primitives::Header;

    #[test]
    fn headers_request_round_trip() {
        let message = LightMessage::GetBlockHeaders(RequestPair {
            request_id: 42,
            message: GetBlockHeaders {
                origin: 4_732_522u64.into(),
                max: 192,
                skip: 0,
                reverse: false,
            },
        });
        let mut buf = Vec::new();
        encode(&message, 0x10, &mut buf);
        assert_eq!(buf[0], 0x12);
        assert_eq!(decode(0x10, &mut buf.as_slice()).unwrap(), message);
    }

    #[test]
    fn headers_response_round_trip() {
        let message = LightMessage::BlockHeaders(ResponsePair {
            request_id: 42,
            buffer_value: 250_000,
            message: vec![Header { number: 4_732_522, ..Default::default() }],
        });
        let mut buf = Vec::new();
        encode(&message, 0x10, &mut buf);
        assert_eq!(decode(0x10, &mut buf.as_slice()).unwrap(), message);
    }

    #[test]
    fn rejects_id_below_offset() {
        let message = LightMessage::GetBlockBodies(RequestPair {
            request_id: 1,
            message: vec![B256::ZERO],
        });
        let mut buf = Vec::new();
        encode(&message, 0x10, &mut buf);
        // pretend the negotiated offset was higher than the id on the wire
        assert!(matches!(
            decode(0x40, &mut buf.as_slice()),
            Err(LightStreamError::InvalidMessageId(_))
        ));
    }

    #[test]
    fn limits_match_the_les_table() {
        assert_eq!(content_limit(RequestKind::Headers), 192);
        assert_eq!(content_limit(RequestKind::Bodies), 32);
        assert_eq!(content_limit(RequestKind::TransactionStatus), 256);
    }
}
