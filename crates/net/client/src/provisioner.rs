//! Splitting one provision into bounded wire messages and reassembling the
//! out-of-order responses.

use crate::{
    error::ProvisionError,
    provision::{Provision, ProvisionId},
};
use alloy_primitives::keccak256;
use lantern_primitives::{Account, TransactionStatus};
use lantern_trie::NodePath;
use lantern_wire::{
    content_limit, GetBlockHeaders, HeaderProofRequest, LightMessage, LightProtocol, ProofRequest,
    RequestPair,
};
use nybbles::Nibbles;
use tracing::trace;

/// Size of one canonical-hash-trie section.
const CHT_SECTION_SIZE: u64 = 32_768;

/// The outcome of feeding one response message to a provisioner.
#[derive(Debug)]
pub enum ProvisionerOutcome {
    /// More responses are outstanding.
    Pending,
    /// All responses arrived; the assembled provision.
    Complete(Box<Provision>),
}

/// Runtime state of one provision in flight on one node.
///
/// A provisioner reserves a contiguous request-id range, one id per wire
/// message, and places each response's items at
/// `(request_id - base) * content_limit` in the pre-sized result slots, so
/// arrival order does not matter.
#[derive(Debug)]
pub struct Provisioner {
    id: ProvisionId,
    provision: Option<Provision>,
    base_request_id: u64,
    messages_count: usize,
    content_limit: usize,
    responses_expected: usize,
    responses_received: usize,
    unsent: Vec<LightMessage>,
}

impl Provisioner {
    /// Splits `provision` into wire messages for `protocol`, reserving its
    /// request-id range from `next_request_id`.
    pub fn establish(
        id: ProvisionId,
        mut provision: Provision,
        protocol: LightProtocol,
        next_request_id: &mut u64,
    ) -> Result<Self, ProvisionError> {
        let size = provision.request_size();
        if size == 0 {
            return Err(ProvisionError::EmptyRequest)
        }
        provision.reserve();

        let limit = content_limit(protocol, provision.kind());
        // submit-transaction is two-phase under one identifier: the relay
        // and the follow-up status query
        let messages_count = match &provision {
            Provision::SubmitTransaction { .. } => 2,
            _ => size.div_ceil(limit),
        };
        let base = *next_request_id;
        *next_request_id += messages_count as u64;

        // the relay phase gets no reply from a pip peer; the status query is
        // the only response to wait for there
        let responses_expected = match (&provision, protocol) {
            (Provision::SubmitTransaction { .. }, LightProtocol::Pip) => 1,
            _ => messages_count,
        };

        let unsent = Self::split(&provision, base, messages_count, limit);
        trace!(
            target: "client::provision",
            ?id,
            base,
            messages_count,
            limit,
            "established provisioner"
        );

        Ok(Self {
            id,
            provision: Some(provision),
            base_request_id: base,
            messages_count,
            content_limit: limit,
            responses_expected,
            responses_received: 0,
            unsent,
        })
    }

    fn split(
        provision: &Provision,
        base: u64,
        messages_count: usize,
        limit: usize,
    ) -> Vec<LightMessage> {
        let mut messages = Vec::with_capacity(messages_count);
        match provision {
            Provision::Headers { start, skip, max, reverse, .. } => {
                for index in 0..messages_count {
                    let offset = (index * limit) as u64 * (*skip + 1);
                    let origin = if *reverse { *start - offset } else { *start + offset };
                    let count = (*max - index * limit).min(limit) as u64;
                    messages.push(LightMessage::GetBlockHeaders(RequestPair {
                        request_id: base + index as u64,
                        message: GetBlockHeaders {
                            origin: origin.into(),
                            max: count,
                            skip: *skip,
                            reverse: *reverse,
                        },
                    }));
                }
            }
            Provision::BlockProofs { numbers, .. } => {
                for (index, chunk) in numbers.chunks(limit).enumerate() {
                    let requests = chunk
                        .iter()
                        .map(|number| HeaderProofRequest {
                            cht_number: number / CHT_SECTION_SIZE,
                            block_number: *number,
                        })
                        .collect();
                    messages.push(LightMessage::GetHeaderProofs(RequestPair {
                        request_id: base + index as u64,
                        message: requests,
                    }));
                }
            }
            Provision::Bodies { hashes, .. } => {
                for (index, chunk) in hashes.chunks(limit).enumerate() {
                    messages.push(LightMessage::GetBlockBodies(RequestPair {
                        request_id: base + index as u64,
                        message: chunk.to_vec(),
                    }));
                }
            }
            Provision::Receipts { hashes, .. } => {
                for (index, chunk) in hashes.chunks(limit).enumerate() {
                    messages.push(LightMessage::GetReceipts(RequestPair {
                        request_id: base + index as u64,
                        message: chunk.to_vec(),
                    }));
                }
            }
            Provision::Accounts { address, hashes, .. } => {
                let key = keccak256(address);
                for (index, chunk) in hashes.chunks(limit).enumerate() {
                    let requests = chunk
                        .iter()
                        .map(|block_hash| ProofRequest {
                            block_hash: *block_hash,
                            account_key: Default::default(),
                            key,
                            from_level: 0,
                        })
                        .collect();
                    messages.push(LightMessage::GetProofs(RequestPair {
                        request_id: base + index as u64,
                        message: requests,
                    }));
                }
            }
            Provision::TxStatuses { hashes, .. } => {
                for (index, chunk) in hashes.chunks(limit).enumerate() {
                    messages.push(LightMessage::GetTransactionStatus(RequestPair {
                        request_id: base + index as u64,
                        message: chunk.to_vec(),
                    }));
                }
            }
            Provision::SubmitTransaction { transaction, hash, .. } => {
                messages.push(LightMessage::SendTransactions(RequestPair {
                    request_id: base,
                    message: vec![transaction.clone()],
                }));
                messages.push(LightMessage::GetTransactionStatus(RequestPair {
                    request_id: base + 1,
                    message: vec![*hash],
                }));
            }
        }
        messages
    }

    /// The caller-level identifier this provisioner serves.
    pub fn provision_id(&self) -> ProvisionId {
        self.id
    }

    /// First request id of the reserved range.
    pub fn base_request_id(&self) -> u64 {
        self.base_request_id
    }

    /// Number of wire messages the provision was split into.
    pub fn messages_count(&self) -> usize {
        self.messages_count
    }

    /// Whether `request_id` falls into this provisioner's reserved range.
    pub fn contains(&self, request_id: u64) -> bool {
        request_id >= self.base_request_id &&
            request_id < self.base_request_id + self.messages_count as u64
    }

    /// Takes the wire messages that still have to be sent.
    pub fn take_messages(&mut self) -> Vec<LightMessage> {
        std::mem::take(&mut self.unsent)
    }

    /// Gives up on the provision, returning it for the failure report.
    pub fn abort(mut self) -> (ProvisionId, Option<Provision>) {
        (self.id, self.provision.take())
    }

    /// Feeds one response message whose request id is
    /// [`contained`](Self::contains) in this provisioner's range. Items are
    /// copied into the provision's slots at the message's offset; completion
    /// is reached when every expected response arrived.
    pub fn handle_message(
        &mut self,
        message: LightMessage,
    ) -> Result<ProvisionerOutcome, ProvisionError> {
        let request_id = message.request_id().ok_or(ProvisionError::WrongResponseKind)?;
        let index = (request_id - self.base_request_id) as usize;
        let offset = index.saturating_mul(self.content_limit);

        let provision = self.provision.as_mut().ok_or(ProvisionError::WrongResponseKind)?;
        match (provision, message) {
            (Provision::Headers { headers, .. }, LightMessage::BlockHeaders(pair)) => {
                place(headers, offset, pair.message)?;
            }
            (
                Provision::BlockProofs { proofs, cht_root, numbers },
                LightMessage::HeaderProofs(pair),
            ) => {
                if pair.message.is_empty() {
                    return Err(ProvisionError::EmptyResponse)
                }
                for (position, proof) in pair.message.into_iter().enumerate() {
                    let slot = offset + position;
                    let number =
                        *numbers.get(slot).ok_or(ProvisionError::WrongResponseKind)?;
                    let path = NodePath::decode(&proof.proof)?;
                    if let Some(root) = cht_root {
                        let key = Nibbles::unpack(number.to_be_bytes());
                        path.verified_value(*root, &key)?
                            .ok_or(ProvisionError::KeyNotFound)?;
                    }
                    proofs[slot] = Some(proof);
                }
            }
            (Provision::Bodies { bodies, .. }, LightMessage::BlockBodies(pair)) => {
                place(bodies, offset, pair.message)?;
            }
            (Provision::Receipts { receipts, .. }, LightMessage::Receipts(pair)) => {
                place(receipts, offset, pair.message)?;
            }
            (
                Provision::Accounts { address, state_roots, accounts, .. },
                LightMessage::Proofs(pair),
            ) => {
                if pair.message.is_empty() {
                    return Err(ProvisionError::EmptyResponse)
                }
                let key = Nibbles::unpack(keccak256(*address));
                for (position, nodes) in pair.message.into_iter().enumerate() {
                    let slot = offset + position;
                    let root =
                        *state_roots.get(slot).ok_or(ProvisionError::WrongResponseKind)?;
                    let path = NodePath::decode(&nodes)?;
                    let account = match path.verified_value(root, &key)? {
                        Some(value) => {
                            <Account as alloy_rlp::Decodable>::decode(&mut value.as_ref())?
                        }
                        // an absent account is the zero account
                        None => Account::default(),
                    };
                    accounts[slot] = Some(account);
                }
            }
            (Provision::TxStatuses { statuses, .. }, LightMessage::TransactionStatus(pair)) => {
                // a peer may silently drop statuses it cannot serve; short
                // responses are allowed and the holes become Unknown at
                // completion
                if pair.message.is_empty() {
                    return Err(ProvisionError::EmptyResponse)
                }
                for (position, status) in pair.message.into_iter().enumerate() {
                    let slot = offset + position;
                    if slot >= statuses.len() {
                        return Err(ProvisionError::WrongResponseKind)
                    }
                    statuses[slot] = Some(status);
                }
            }
            (
                Provision::SubmitTransaction { status, .. },
                LightMessage::TransactionStatus(pair),
            ) => {
                // both the relay echo and the follow-up query answer with a
                // status; the newest one wins
                let newest =
                    pair.message.into_iter().next().ok_or(ProvisionError::EmptyResponse)?;
                *status = Some(newest);
            }
            _ => return Err(ProvisionError::WrongResponseKind),
        }

        self.responses_received += 1;
        trace!(
            target: "client::provision",
            id = ?self.id,
            received = self.responses_received,
            expected = self.responses_expected,
            "absorbed response"
        );
        if self.responses_received < self.responses_expected {
            return Ok(ProvisionerOutcome::Pending)
        }

        let mut provision = self.provision.take().ok_or(ProvisionError::WrongResponseKind)?;
        finalize(&mut provision)?;
        Ok(ProvisionerOutcome::Complete(Box::new(provision)))
    }
}

/// Places `items` into `slots` starting at `offset`. An empty response is an
/// error, as is one that runs past the end of the request.
fn place<T>(slots: &mut [Option<T>], offset: usize, items: Vec<T>) -> Result<(), ProvisionError> {
    if items.is_empty() {
        return Err(ProvisionError::EmptyResponse)
    }
    for (position, item) in items.into_iter().enumerate() {
        let slot =
            slots.get_mut(offset + position).ok_or(ProvisionError::WrongResponseKind)?;
        *slot = Some(item);
    }
    Ok(())
}

/// Checks that every slot was filled. Transaction statuses are the
/// exception: peers may drop entries, and the dropped slots are reported as
/// [`TransactionStatus::Unknown`].
fn finalize(provision: &mut Provision) -> Result<(), ProvisionError> {
    match provision {
        Provision::Headers { headers, .. } => all_filled(headers),
        Provision::BlockProofs { proofs, .. } => all_filled(proofs),
        Provision::Bodies { bodies, .. } => all_filled(bodies),
        Provision::Receipts { receipts, .. } => all_filled(receipts),
        Provision::Accounts { accounts, .. } => all_filled(accounts),
        Provision::TxStatuses { statuses, .. } => {
            for slot in statuses.iter_mut() {
                if slot.is_none() {
                    *slot = Some(TransactionStatus::Unknown);
                }
            }
            Ok(())
        }
        Provision::SubmitTransaction { status, .. } => {
            if status.is_none() {
                *status = Some(TransactionStatus::Unknown);
            }
            Ok(())
        }
    }
}

fn all_filled<T>(slots: &[Option<T>]) -> Result<(), ProvisionError> {
    if slots.iter().any(Option::is_none) {
        return Err(ProvisionError::EmptyResponse)
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use assert_matches::assert_matches;
    use lantern_primitives::Header;
    use lantern_wire::ResponsePair;

    fn headers_provisioner(max: usize, reverse: bool) -> Provisioner {
        let mut next_id = 100;
        Provisioner::establish(
            ProvisionId(1),
            Provision::headers(4_732_522, 0, max, reverse),
            LightProtocol::Les,
            &mut next_id,
        )
        .unwrap()
    }

    fn header(number: u64) -> Header {
        Header { number, ..Default::default() }
    }

    fn response(request_id: u64, headers: Vec<Header>) -> LightMessage {
        LightMessage::BlockHeaders(ResponsePair { request_id, buffer_value: 0, message: headers })
    }

    #[test]
    fn message_count_is_ceil_of_size_over_limit() {
        // les headers limit is 192
        assert_eq!(headers_provisioner(1, false).messages_count(), 1);
        assert_eq!(headers_provisioner(192, false).messages_count(), 1);
        assert_eq!(headers_provisioner(193, false).messages_count(), 2);
        assert_eq!(headers_provisioner(500, false).messages_count(), 3);
    }

    #[test]
    fn reserves_a_contiguous_request_id_range() {
        let mut next_id = 7;
        let first = Provisioner::establish(
            ProvisionId(1),
            Provision::headers(0, 0, 500, false),
            LightProtocol::Les,
            &mut next_id,
        )
        .unwrap();
        assert_eq!(first.base_request_id(), 7);
        assert_eq!(next_id, 10);
        assert!(first.contains(7));
        assert!(first.contains(9));
        assert!(!first.contains(10));
    }

    #[test]
    fn splits_header_windows_at_the_limit() {
        let mut provisioner = headers_provisioner(500, false);
        let messages = provisioner.take_messages();
        assert_eq!(messages.len(), 3);

        let expect = [(4_732_522u64, 192u64), (4_732_714, 192), (4_732_906, 116)];
        for (message, (origin, max)) in messages.iter().zip(expect) {
            match message {
                LightMessage::GetBlockHeaders(pair) => {
                    assert_eq!(pair.message.origin, origin.into());
                    assert_eq!(pair.message.max, max);
                }
                other => panic!("expected header request, got {other:?}"),
            }
        }
    }

    #[test]
    fn honors_skip_in_window_origins(){
        let mut next_id = 0;
        let mut provisioner = Provisioner::establish(
            ProvisionId(1),
            Provision::headers(1_000, 3, 400, false),
            LightProtocol::Les,
            &mut next_id,
        )
        .unwrap();
        let messages = provisioner.take_messages();
        match &messages[1] {
            LightMessage::GetBlockHeaders(pair) => {
                // the second window starts 192 requested headers later,
                // which is 192 * (skip + 1) blocks away
                assert_eq!(pair.message.origin, (1_000 + 192 * 4).into());
                assert_eq!(pair.message.skip, 3);
            }
            other => panic!("expected header request, got {other:?}"),
        }
    }

    #[test]
    fn any_permutation_assembles_identically() {
        let base = 100;
        let total = 500usize;

        let respond = |request_id: u64| {
            let index = (request_id - base) as usize;
            let offset = index * 192;
            let count = (total - offset).min(192);
            response(
                request_id,
                (0..count).map(|j| header(4_732_522 + (offset + j) as u64)).collect(),
            )
        };

        for order in [[0u64, 1, 2], [2, 1, 0], [1, 2, 0], [2, 0, 1]] {
            let mut provisioner = headers_provisioner(total, false);
            let _ = provisioner.take_messages();

            let mut result = None;
            for index in order {
                match provisioner.handle_message(respond(base + index)).unwrap() {
                    ProvisionerOutcome::Pending => assert!(result.is_none()),
                    ProvisionerOutcome::Complete(provision) => result = Some(provision),
                }
            }
            match *result.expect("completed after all responses") {
                Provision::Headers { headers, .. } => {
                    assert_eq!(headers.len(), total);
                    for (i, slot) in headers.iter().enumerate() {
                        assert_eq!(
                            slot.as_ref().expect("slot filled").number,
                            4_732_522 + i as u64
                        );
                    }
                }
                other => panic!("expected headers, got {other:?}"),
            }
        }
    }

    #[test]
    fn reverse_headers_stay_at_request_order_indices() {
        let mut provisioner = headers_provisioner(3, true);
        let _ = provisioner.take_messages();

        // a reverse request walks down from the origin; the response stays
        // in served order and so do the slots
        let outcome = provisioner
            .handle_message(response(
                100,
                vec![header(4_732_522), header(4_732_521), header(4_732_520)],
            ))
            .unwrap();
        match outcome {
            ProvisionerOutcome::Complete(provision) => match *provision {
                Provision::Headers { headers, .. } => {
                    let numbers: Vec<_> =
                        headers.iter().map(|h| h.as_ref().unwrap().number).collect();
                    assert_eq!(numbers, vec![4_732_522, 4_732_521, 4_732_520]);
                }
                other => panic!("expected headers, got {other:?}"),
            },
            ProvisionerOutcome::Pending => panic!("single message must complete"),
        }
    }

    #[test]
    fn empty_response_fails_the_provision() {
        let mut provisioner = headers_provisioner(3, false);
        let _ = provisioner.take_messages();
        assert_matches!(
            provisioner.handle_message(response(100, Vec::new())),
            Err(ProvisionError::EmptyResponse)
        );
    }

    #[test]
    fn wrong_kind_response_is_rejected() {
        let mut provisioner = headers_provisioner(3, false);
        let _ = provisioner.take_messages();
        let wrong = LightMessage::TransactionStatus(ResponsePair {
            request_id: 100,
            buffer_value: 0,
            message: vec![TransactionStatus::Queued],
        });
        assert_matches!(
            provisioner.handle_message(wrong),
            Err(ProvisionError::WrongResponseKind)
        );
    }

    #[test]
    fn dropped_tx_status_slots_become_unknown() {
        let mut next_id = 0;
        let hashes = vec![B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(3)];
        let mut provisioner = Provisioner::establish(
            ProvisionId(9),
            Provision::tx_statuses(hashes),
            LightProtocol::Les,
            &mut next_id,
        )
        .unwrap();
        let _ = provisioner.take_messages();

        // the peer only answers for the first two hashes
        let outcome = provisioner
            .handle_message(LightMessage::TransactionStatus(ResponsePair {
                request_id: 0,
                buffer_value: 0,
                message: vec![
                    TransactionStatus::Pending,
                    TransactionStatus::Queued,
                ],
            }))
            .unwrap();
        match outcome {
            ProvisionerOutcome::Complete(provision) => match *provision {
                Provision::TxStatuses { statuses, .. } => {
                    assert_eq!(
                        statuses,
                        vec![
                            Some(TransactionStatus::Pending),
                            Some(TransactionStatus::Queued),
                            Some(TransactionStatus::Unknown),
                        ]
                    );
                }
                other => panic!("expected statuses, got {other:?}"),
            },
            ProvisionerOutcome::Pending => panic!("single message must complete"),
        }
    }

    #[test]
    fn submit_transaction_is_two_phase_for_les() {
        let mut next_id = 0;
        let mut provisioner = Provisioner::establish(
            ProvisionId(4),
            Provision::submit_transaction(
                lantern_primitives::RlpItem(alloy_primitives::Bytes::from_static(&[0x01])),
                B256::repeat_byte(0x22),
            ),
            LightProtocol::Les,
            &mut next_id,
        )
        .unwrap();
        let messages = provisioner.take_messages();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], LightMessage::SendTransactions(_)));
        assert!(matches!(messages[1], LightMessage::GetTransactionStatus(_)));

        // relay echo
        let outcome = provisioner
            .handle_message(LightMessage::TransactionStatus(ResponsePair {
                request_id: 0,
                buffer_value: 0,
                message: vec![TransactionStatus::Pending],
            }))
            .unwrap();
        assert!(matches!(outcome, ProvisionerOutcome::Pending));

        // status query
        let outcome = provisioner
            .handle_message(LightMessage::TransactionStatus(ResponsePair {
                request_id: 1,
                buffer_value: 0,
                message: vec![TransactionStatus::Included(Default::default())],
            }))
            .unwrap();
        match outcome {
            ProvisionerOutcome::Complete(provision) => match *provision {
                Provision::SubmitTransaction { status, .. } => {
                    assert_eq!(status, Some(TransactionStatus::Included(Default::default())));
                }
                other => panic!("expected submit, got {other:?}"),
            },
            ProvisionerOutcome::Pending => panic!("both responses arrived"),
        }
    }

    #[test]
    fn submit_transaction_expects_one_response_for_pip() {
        let mut next_id = 0;
        let mut provisioner = Provisioner::establish(
            ProvisionId(4),
            Provision::submit_transaction(
                lantern_primitives::RlpItem(alloy_primitives::Bytes::from_static(&[0x01])),
                B256::repeat_byte(0x22),
            ),
            LightProtocol::Pip,
            &mut next_id,
        )
        .unwrap();
        let _ = provisioner.take_messages();

        // only the status query answers; the relay is fire-and-forget
        let outcome = provisioner
            .handle_message(LightMessage::TransactionStatus(ResponsePair {
                request_id: 1,
                buffer_value: 0,
                message: vec![TransactionStatus::Queued],
            }))
            .unwrap();
        assert!(matches!(outcome, ProvisionerOutcome::Complete(_)));
    }

    #[test]
    fn pip_requests_are_never_split() {
        let mut next_id = 0;
        let mut provisioner = Provisioner::establish(
            ProvisionId(2),
            Provision::headers(0, 0, 100_000, false),
            LightProtocol::Pip,
            &mut next_id,
        )
        .unwrap();
        assert_eq!(provisioner.messages_count(), 1);
        assert_eq!(provisioner.take_messages().len(), 1);
    }

    #[test]
    fn zero_item_provision_is_rejected() {
        let mut next_id = 0;
        assert_matches!(
            Provisioner::establish(
                ProvisionId(1),
                Provision::bodies(Vec::new()),
                LightProtocol::Les,
                &mut next_id,
            ),
            Err(ProvisionError::EmptyRequest)
        );
    }
}
