//! The light sub-protocol handshake announcement.

use crate::credits::{CostTable, FlowControlParams};
use alloy_primitives::{B256, U256};
use alloy_rlp::{length_of_length, Decodable, Encodable};
use bytes::{Buf, BufMut};
use std::fmt::{Debug, Display};

/// The status message both sides announce after Hello: a list of `[key,
/// value]` pairs so either side can extend it without breaking the other.
/// Unknown keys are ignored on decode.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LightStatus {
    /// The announced sub-protocol version.
    pub protocol_version: u64,
    /// The chain id of the network the peer serves.
    pub network_id: u64,
    /// Total difficulty of the peer's best chain.
    pub head_td: U256,
    /// Hash of the peer's best block.
    pub head_hash: B256,
    /// Number of the peer's best block.
    pub head_num: u64,
    /// The genesis hash of the peer's chain.
    pub genesis_hash: B256,
    /// Announcement signature scheme the peer asks for, if any.
    pub announce_type: Option<u64>,
    /// Whether the peer serves header requests.
    pub serve_headers: bool,
    /// Oldest block the peer serves chain data for, if announced.
    pub serve_chain_since: Option<u64>,
    /// Oldest block the peer serves state for, if announced.
    pub serve_state_since: Option<u64>,
    /// Whether the peer relays transactions.
    pub tx_relay: bool,
    /// The peer's flow control parameters, absent for pure clients.
    pub flow_control: Option<FlowControlParams>,
}

mod keys {
    pub(super) const PROTOCOL_VERSION: &str = "protocolVersion";
    pub(super) const NETWORK_ID: &str = "networkId";
    pub(super) const HEAD_TD: &str = "headTd";
    pub(super) const HEAD_HASH: &str = "headHash";
    pub(super) const HEAD_NUM: &str = "headNum";
    pub(super) const GENESIS_HASH: &str = "genesisHash";
    pub(super) const ANNOUNCE_TYPE: &str = "announceType";
    pub(super) const SERVE_HEADERS: &str = "serveHeaders";
    pub(super) const SERVE_CHAIN_SINCE: &str = "serveChainSince";
    pub(super) const SERVE_STATE_SINCE: &str = "serveStateSince";
    pub(super) const TX_RELAY: &str = "txRelay";
    pub(super) const FLOW_BUFFER_LIMIT: &str = "flowControl/BL";
    pub(super) const FLOW_RECHARGE_RATE: &str = "flowControl/MRR";
    pub(super) const FLOW_COST_TABLE: &str = "flowControl/MRC";
}

fn encode_pair(key: &str, value: &dyn Encodable, out: &mut dyn BufMut) {
    let payload_length = key.length() + value.length();
    alloy_rlp::Header { list: true, payload_length }.encode(out);
    key.encode(out);
    value.encode(out);
}

fn pair_length(key: &str, value: &dyn Encodable) -> usize {
    let payload_length = key.length() + value.length();
    payload_length + length_of_length(payload_length)
}

impl LightStatus {
    fn for_each_pair(&self, mut f: impl FnMut(&str, &dyn Encodable)) {
        f(keys::PROTOCOL_VERSION, &self.protocol_version);
        f(keys::NETWORK_ID, &self.network_id);
        f(keys::HEAD_TD, &self.head_td);
        f(keys::HEAD_HASH, &self.head_hash);
        f(keys::HEAD_NUM, &self.head_num);
        f(keys::GENESIS_HASH, &self.genesis_hash);
        if let Some(announce_type) = &self.announce_type {
            f(keys::ANNOUNCE_TYPE, announce_type);
        }
        if self.serve_headers {
            f(keys::SERVE_HEADERS, &"");
        }
        if let Some(since) = &self.serve_chain_since {
            f(keys::SERVE_CHAIN_SINCE, since);
        }
        if let Some(since) = &self.serve_state_since {
            f(keys::SERVE_STATE_SINCE, since);
        }
        if self.tx_relay {
            f(keys::TX_RELAY, &"");
        }
        if let Some(flow) = &self.flow_control {
            f(keys::FLOW_BUFFER_LIMIT, &flow.buffer_limit);
            f(keys::FLOW_RECHARGE_RATE, &flow.recharge_rate);
            f(keys::FLOW_COST_TABLE, &flow.cost_table);
        }
    }

    fn payload_length(&self) -> usize {
        let mut length = 0;
        self.for_each_pair(|key, value| length += pair_length(key, value));
        length
    }

    /// Helper for returning a builder for the status message.
    pub fn builder() -> LightStatusBuilder {
        Default::default()
    }
}

impl Encodable for LightStatus {
    fn encode(&self, out: &mut dyn BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.for_each_pair(|key, value| encode_pair(key, value, out));
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

impl Decodable for LightStatus {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let list_header = alloy_rlp::Header::decode(buf)?;
        if !list_header.list {
            return Err(alloy_rlp::Error::UnexpectedString)
        }
        if buf.len() < list_header.payload_length {
            return Err(alloy_rlp::Error::InputTooShort)
        }
        let mut body = &buf[..list_header.payload_length];
        buf.advance(list_header.payload_length);

        let mut protocol_version = None;
        let mut network_id = None;
        let mut head_td = None;
        let mut head_hash = None;
        let mut head_num = None;
        let mut genesis_hash = None;
        let mut announce_type = None;
        let mut serve_headers = false;
        let mut serve_chain_since = None;
        let mut serve_state_since = None;
        let mut tx_relay = false;
        let mut buffer_limit = None;
        let mut recharge_rate = None;
        let mut cost_table = None;

        while !body.is_empty() {
            let pair_header = alloy_rlp::Header::decode(&mut body)?;
            if !pair_header.list {
                return Err(alloy_rlp::Error::UnexpectedString)
            }
            if body.len() < pair_header.payload_length {
                return Err(alloy_rlp::Error::InputTooShort)
            }
            let mut pair = &body[..pair_header.payload_length];
            body.advance(pair_header.payload_length);

            let key = String::decode(&mut pair)?;
            match key.as_str() {
                keys::PROTOCOL_VERSION => protocol_version = Some(u64::decode(&mut pair)?),
                keys::NETWORK_ID => network_id = Some(u64::decode(&mut pair)?),
                keys::HEAD_TD => head_td = Some(U256::decode(&mut pair)?),
                keys::HEAD_HASH => head_hash = Some(B256::decode(&mut pair)?),
                keys::HEAD_NUM => head_num = Some(u64::decode(&mut pair)?),
                keys::GENESIS_HASH => genesis_hash = Some(B256::decode(&mut pair)?),
                keys::ANNOUNCE_TYPE => announce_type = Some(u64::decode(&mut pair)?),
                keys::SERVE_HEADERS => serve_headers = true,
                keys::SERVE_CHAIN_SINCE => serve_chain_since = Some(u64::decode(&mut pair)?),
                keys::SERVE_STATE_SINCE => serve_state_since = Some(u64::decode(&mut pair)?),
                keys::TX_RELAY => tx_relay = true,
                keys::FLOW_BUFFER_LIMIT => buffer_limit = Some(u64::decode(&mut pair)?),
                keys::FLOW_RECHARGE_RATE => recharge_rate = Some(u64::decode(&mut pair)?),
                keys::FLOW_COST_TABLE => cost_table = Some(CostTable::decode(&mut pair)?),
                // forward compatible: skip announcements we do not know
                _ => {}
            }
        }

        let flow_control = match (buffer_limit, recharge_rate, cost_table) {
            (Some(buffer_limit), Some(recharge_rate), Some(cost_table)) => {
                Some(FlowControlParams { buffer_limit, recharge_rate, cost_table })
            }
            (None, None, None) => None,
            _ => return Err(alloy_rlp::Error::Custom("incomplete flow control announcement")),
        };

        let missing = alloy_rlp::Error::Custom("missing required status key");
        Ok(Self {
            protocol_version: protocol_version.ok_or(missing.clone())?,
            network_id: network_id.ok_or(missing.clone())?,
            head_td: head_td.ok_or(missing.clone())?,
            head_hash: head_hash.ok_or(missing.clone())?,
            head_num: head_num.ok_or(missing.clone())?,
            genesis_hash: genesis_hash.ok_or(missing)?,
            announce_type,
            serve_headers,
            serve_chain_since,
            serve_state_since,
            tx_relay,
            flow_control,
        })
    }
}

impl Display for LightStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Status {{ version: {}, network: {}, head: {} ({}), td: {}, genesis: {} }}",
            self.protocol_version,
            self.network_id,
            self.head_num,
            self.head_hash,
            self.head_td,
            self.genesis_hash,
        )
    }
}

impl Debug for LightStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightStatus")
            .field("protocol_version", &self.protocol_version)
            .field("network_id", &self.network_id)
            .field("head_td", &self.head_td)
            .field("head_hash", &self.head_hash)
            .field("head_num", &self.head_num)
            .field("genesis_hash", &self.genesis_hash)
            .field("flow_control", &self.flow_control.is_some())
            .finish()
    }
}

/// Builder for [`LightStatus`].
#[derive(Debug, Default)]
pub struct LightStatusBuilder {
    protocol_version: Option<u64>,
    network_id: Option<u64>,
    head_td: Option<U256>,
    head_hash: Option<B256>,
    head_num: Option<u64>,
    genesis_hash: Option<B256>,
    announce_type: Option<u64>,
    serve_headers: bool,
    serve_chain_since: Option<u64>,
    serve_state_since: Option<u64>,
    tx_relay: bool,
    flow_control: Option<FlowControlParams>,
}

impl LightStatusBuilder {
    /// Sets the sub-protocol version.
    pub fn version(mut self, version: u64) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Sets the network id.
    pub fn network(mut self, network_id: u64) -> Self {
        self.network_id = Some(network_id);
        self
    }

    /// Sets the head hash, number and total difficulty.
    pub fn head(mut self, hash: B256, number: u64, td: U256) -> Self {
        self.head_hash = Some(hash);
        self.head_num = Some(number);
        self.head_td = Some(td);
        self
    }

    /// Sets the genesis hash.
    pub fn genesis(mut self, hash: B256) -> Self {
        self.genesis_hash = Some(hash);
        self
    }

    /// Marks the announcer as serving headers and chain data from genesis.
    pub fn serving(mut self) -> Self {
        self.serve_headers = true;
        self.serve_chain_since = Some(0);
        self.serve_state_since = Some(0);
        self.tx_relay = true;
        self
    }

    /// Sets the flow control parameters.
    pub fn flow_control(mut self, params: FlowControlParams) -> Self {
        self.flow_control = Some(params);
        self
    }

    /// Builds the status, defaulting the version to `2` and everything not
    /// configured to absent.
    pub fn build(self) -> LightStatus {
        let Self {
            protocol_version,
            network_id,
            head_td,
            head_hash,
            head_num,
            genesis_hash,
            announce_type,
            serve_headers,
            serve_chain_since,
            serve_state_since,
            tx_relay,
            flow_control,
        } = self;
        LightStatus {
            protocol_version: protocol_version.unwrap_or(2),
            network_id: network_id.unwrap_or(1),
            head_td: head_td.unwrap_or_default(),
            head_hash: head_hash.unwrap_or_default(),
            head_num: head_num.unwrap_or_default(),
            genesis_hash: genesis_hash.unwrap_or_default(),
            announce_type,
            serve_headers,
            serve_chain_since,
            serve_state_since,
            tx_relay,
            flow_control,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::CostEntry;
    use bytes::BytesMut;

    fn sample_status() -> LightStatus {
        LightStatus::builder()
            .version(2)
            .network(1)
            .head(B256::repeat_byte(0xbe), 4_732_522, U256::from(2_417u64))
            .genesis(B256::repeat_byte(0x11))
            .serving()
            .flow_control(FlowControlParams {
                buffer_limit: 300_000,
                recharge_rate: 100,
                cost_table: CostTable {
                    entries: vec![CostEntry {
                        message_id: 2,
                        base_cost: 150_000,
                        request_cost: 30_000,
                    }],
                },
            })
            .build()
    }

    #[test]
    fn status_round_trip() {
        let status = sample_status();
        let mut buf = Vec::new();
        status.encode(&mut buf);
        assert_eq!(buf.len(), status.length());
        assert_eq!(LightStatus::decode(&mut buf.as_slice()).unwrap(), status);
    }

    #[test]
    fn status_without_flow_control_round_trip() {
        let status = LightStatus::builder()
            .network(5)
            .head(B256::repeat_byte(0x01), 1, U256::from(2u64))
            .genesis(B256::repeat_byte(0x02))
            .build();
        let mut buf = Vec::new();
        status.encode(&mut buf);
        let decoded = LightStatus::decode(&mut buf.as_slice()).unwrap();
        assert!(decoded.flow_control.is_none());
        assert_eq!(decoded, status);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let status = sample_status();
        // re-encode with an extra pair spliced into the body
        let mut body = BytesMut::new();
        status.for_each_pair(|key, value| encode_pair(key, value, &mut body));
        encode_pair("flowControl/experimental", &7u64, &mut body);

        let mut buf = BytesMut::new();
        alloy_rlp::Header { list: true, payload_length: body.len() }.encode(&mut buf);
        buf.extend_from_slice(&body);

        let decoded = LightStatus::decode(&mut buf.as_ref()).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn missing_required_key_is_rejected() {
        // a status consisting only of a network id
        let mut body = BytesMut::new();
        encode_pair(keys::NETWORK_ID, &1u64, &mut body);
        let mut buf = BytesMut::new();
        alloy_rlp::Header { list: true, payload_length: body.len() }.encode(&mut buf);
        buf.extend_from_slice(&body);

        assert!(LightStatus::decode(&mut buf.as_ref()).is_err());
    }
}
