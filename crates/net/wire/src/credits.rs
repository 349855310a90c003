//! Request flow control: the server-announced cost table and the advisory
//! credit counter derived from it.
//!
//! Credits are bookkeeping only. Nothing in this crate or above it blocks on
//! the counter; it exists so a scheduler *may* prefer peers with headroom.

use alloy_rlp::{RlpDecodable, RlpEncodable};

/// The announced cost of one message type: a flat cost per request message
/// plus a cost per requested item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostEntry {
    /// The message id this entry prices, relative to the capability offset.
    pub message_id: u64,
    /// Flat cost charged per message.
    pub base_cost: u64,
    /// Cost charged per requested item.
    pub request_cost: u64,
}

/// The per-message-type cost table a server announces in its status message.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostTable {
    /// The announced entries, one per priced message id.
    pub entries: Vec<CostEntry>,
}

impl CostTable {
    /// Looks up the cost entry for a capability-relative message id.
    pub fn cost(&self, message_id: u8) -> Option<CostEntry> {
        self.entries.iter().copied().find(|entry| entry.message_id == message_id as u64)
    }

    /// The cost of a message of type `message_id` requesting `count` items.
    /// Unpriced message types cost nothing.
    pub fn estimate(&self, message_id: u8, count: usize) -> u64 {
        self.cost(message_id)
            .map(|entry| entry.base_cost + entry.request_cost * count as u64)
            .unwrap_or_default()
    }
}

/// The flow control parameters of a server, from its status announcement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowControlParams {
    /// Maximum credit buffer the server grants us.
    pub buffer_limit: u64,
    /// Credits recharged per second.
    pub recharge_rate: u64,
    /// Per-message-type costs.
    pub cost_table: CostTable,
}

/// The advisory credit counter for one connection.
///
/// Every response echoes the server's view of our remaining allowance; the
/// counter tracks the newest such echo and never reverts to an older one.
#[derive(Clone, Debug, Default)]
pub struct Credits {
    params: FlowControlParams,
    remaining: u64,
    last_request_id: u64,
}

impl Credits {
    /// Creates the counter from the server's announced parameters, starting
    /// with a full buffer.
    pub fn new(params: FlowControlParams) -> Self {
        let remaining = params.buffer_limit;
        Self { params, remaining, last_request_id: 0 }
    }

    /// Remaining allowance as of the newest absorbed response.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// The server's announced flow control parameters.
    pub fn params(&self) -> &FlowControlParams {
        &self.params
    }

    /// Estimated cost of a message of type `message_id` with `count`
    /// requested items.
    pub fn estimate(&self, message_id: u8, count: usize) -> u64 {
        self.params.cost_table.estimate(message_id, count)
    }

    /// Absorbs the buffer value echoed on the response to `request_id`.
    ///
    /// Responses can arrive out of order; an echo belonging to an older
    /// request than the newest one already absorbed is stale and ignored.
    pub fn absorb(&mut self, request_id: u64, buffer_value: u64) {
        if request_id < self.last_request_id {
            return
        }
        self.last_request_id = request_id;
        self.remaining = buffer_value;
    }
}
