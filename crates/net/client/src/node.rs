//! The manager-side record of one peer: its endpoints, per-route states,
//! negotiated capability, credits and in-flight provisioners.

use crate::{
    provisioner::Provisioner,
    route::{RouteKind, RouteState},
    session::SessionCommand,
};
use lantern_primitives::{NodeRecord, PeerId};
use lantern_wire::{les, Announce, Credits, DisconnectReason, LightMessage, SharedCapability};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::trace;

/// Events a route task reports back to the manager.
#[derive(Debug)]
pub(crate) enum NodeEvent {
    /// A route changed state.
    State {
        /// Which route.
        route: RouteKind,
        /// The new state.
        state: RouteState,
    },
    /// The TCP route finished its handshake sequence.
    TcpConnected {
        /// The negotiated capability.
        capability: SharedCapability,
        /// The peer's status announcement.
        status: Box<lantern_wire::LightStatus>,
    },
    /// A sub-protocol request/response message arrived.
    Message(LightMessage),
    /// The peer announced a new head.
    Announce(Announce),
    /// The peer answered a find-node query.
    Neighbours(Vec<NodeRecord>),
}

/// One peer as the manager sees it.
///
/// The node exclusively owns its endpoint data; the sockets themselves live
/// in the per-route tasks, which report every state change through the
/// manager's event channel. Both routes are independent.
#[derive(Debug)]
pub struct Node {
    record: NodeRecord,
    tcp_state: RouteState,
    udp_state: RouteState,
    capability: Option<SharedCapability>,
    credits: Credits,
    next_request_id: u64,
    provisioners: Vec<Provisioner>,
    pub(crate) to_session: Option<mpsc::UnboundedSender<SessionCommand>>,
    pub(crate) to_disc: Option<mpsc::UnboundedSender<crate::discroute::DiscCommand>>,
}

impl Node {
    /// Creates a node in `Available`/`Available`, not yet connected on
    /// either route.
    pub fn new(record: NodeRecord) -> Self {
        Self {
            record,
            tcp_state: RouteState::Available,
            udp_state: RouteState::Available,
            capability: None,
            credits: Credits::default(),
            next_request_id: 0,
            provisioners: Vec::new(),
            to_session: None,
            to_disc: None,
        }
    }

    /// The peer's identity.
    pub fn peer_id(&self) -> PeerId {
        self.record.id
    }

    /// The peer's advertised endpoints.
    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    /// The state of a route.
    pub fn route_state(&self, route: RouteKind) -> RouteState {
        match route {
            RouteKind::Tcp => self.tcp_state,
            RouteKind::Udp => self.udp_state,
        }
    }

    pub(crate) fn set_route_state(&mut self, route: RouteKind, state: RouteState) {
        trace!(target: "client::node", peer = %self.record.id, ?route, ?state, "route state");
        match route {
            RouteKind::Tcp => self.tcp_state = state,
            RouteKind::Udp => self.udp_state = state,
        }
    }

    /// The capability negotiated on the TCP route, once connected.
    pub fn capability(&self) -> Option<SharedCapability> {
        self.capability
    }

    pub(crate) fn on_tcp_connected(
        &mut self,
        capability: SharedCapability,
        status: &lantern_wire::LightStatus,
    ) {
        self.capability = Some(capability);
        if let Some(flow) = &status.flow_control {
            self.credits = Credits::new(flow.clone());
        }
        self.tcp_state = RouteState::Connected;
    }

    /// The advisory credit counter for this node.
    pub fn credits(&self) -> &Credits {
        &self.credits
    }

    /// Estimated cost of sending `message` to this node, from the cost
    /// table its status announced. Advisory: nothing blocks on this.
    pub fn estimate_credits(&self, message: &LightMessage) -> u64 {
        let count = message.request_count().unwrap_or(1);
        self.credits.estimate(les::message_id(message) as u8, count)
    }

    pub(crate) fn absorb_credits(&mut self, request_id: u64, buffer_value: u64) {
        self.credits.absorb(request_id, buffer_value);
    }

    /// Marks the node's TCP route exhausted; it stays unusable until an
    /// explicit disconnect.
    pub fn set_exhausted(&mut self) {
        self.tcp_state = RouteState::Exhausted { since: Instant::now() };
    }

    pub(crate) fn next_request_id(&mut self) -> &mut u64 {
        &mut self.next_request_id
    }

    pub(crate) fn push_provisioner(&mut self, provisioner: Provisioner) {
        self.provisioners.push(provisioner);
    }

    /// The provisioner whose reserved request-id range contains
    /// `request_id`.
    pub(crate) fn provisioner_for(&mut self, request_id: u64) -> Option<&mut Provisioner> {
        self.provisioners.iter_mut().find(|p| p.contains(request_id))
    }

    pub(crate) fn remove_provisioner(&mut self, request_id: u64) -> Option<Provisioner> {
        let index = self.provisioners.iter().position(|p| p.contains(request_id))?;
        Some(self.provisioners.swap_remove(index))
    }

    pub(crate) fn take_provisioners(&mut self) -> Vec<Provisioner> {
        std::mem::take(&mut self.provisioners)
    }

    /// Number of provisions currently in flight on this node.
    pub fn inflight(&self) -> usize {
        self.provisioners.len()
    }

    /// Hands a wire message to the TCP route. Failures surface
    /// asynchronously as route state changes; a `false` return means the
    /// session is already gone.
    pub(crate) fn send(&self, message: LightMessage) -> bool {
        match &self.to_session {
            Some(tx) => tx.send(SessionCommand::Send(message)).is_ok(),
            None => false,
        }
    }

    /// Disconnects one route. A requested disconnect always lands the route
    /// in `Available`; the socket is closed by the route task when its
    /// command channel drops. Dropping the sender here makes that happen
    /// exactly once.
    pub(crate) fn disconnect(
        &mut self,
        route: RouteKind,
        requested: bool,
        reason: Option<DisconnectReason>,
    ) {
        match route {
            RouteKind::Tcp => {
                if let Some(tx) = self.to_session.take() {
                    let _ = tx.send(SessionCommand::Disconnect(
                        reason.unwrap_or(DisconnectReason::DisconnectRequested),
                    ));
                }
                self.capability = None;
                self.tcp_state = self.tcp_state.disconnected(requested, reason);
            }
            RouteKind::Udp => {
                self.to_disc = None;
                self.udp_state = self.udp_state.disconnected(requested, reason);
            }
        }
    }

    /// Whether the node can serve provisions right now.
    pub fn is_usable(&self) -> bool {
        self.tcp_state.is_connected() && self.capability.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{ConnectStep, ProtocolError};
    use std::net::SocketAddr;

    fn test_node() -> Node {
        let addr: SocketAddr = "127.0.0.1:30303".parse().unwrap();
        Node::new(NodeRecord::new(addr, PeerId::repeat_byte(0x11)))
    }

    #[test]
    fn created_available_on_both_routes() {
        let node = test_node();
        assert!(node.route_state(RouteKind::Tcp).is_available());
        assert!(node.route_state(RouteKind::Udp).is_available());
        assert!(!node.is_usable());
    }

    #[test]
    fn routes_are_independent() {
        let mut node = test_node();
        node.set_route_state(RouteKind::Udp, RouteState::Connecting(ConnectStep::AwaitingPong));
        assert!(node.route_state(RouteKind::Tcp).is_available());
        assert!(node.route_state(RouteKind::Udp).is_connecting());
    }

    #[test]
    fn requested_disconnect_resets_any_route_state() {
        let mut node = test_node();
        node.set_route_state(RouteKind::Tcp, RouteState::ErrorProtocol(ProtocolError::TcpHello));
        node.disconnect(RouteKind::Tcp, true, None);
        assert!(node.route_state(RouteKind::Tcp).is_available());

        node.set_exhausted();
        node.disconnect(RouteKind::Tcp, true, None);
        assert!(node.route_state(RouteKind::Tcp).is_available());
    }

    #[test]
    fn estimate_is_zero_without_a_cost_table() {
        let node = test_node();
        let message = LightMessage::GetBlockHeaders(lantern_wire::RequestPair {
            request_id: 0,
            message: lantern_wire::GetBlockHeaders {
                origin: 1u64.into(),
                max: 10,
                skip: 0,
                reverse: false,
            },
        });
        assert_eq!(node.estimate_credits(&message), 0);
    }
}
