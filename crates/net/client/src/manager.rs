//! High level management of the node pool.
//!
//! The [`NodeManager`] is an endless future that owns every [`Node`],
//! spawns and supervises their route tasks, fans submitted provisions out
//! across connected nodes and routes inbound responses back to the owning
//! provisioner. All state mutation happens on the manager's poll loop, so
//! callbacks observe it serialized.

use crate::{
    config::ClientConfig,
    discroute::{self, DiscCommand},
    error::{NetworkError, ProvisionError},
    node::{Node, NodeEvent},
    provision::{Provision, ProvisionId, ProvisionResult},
    provisioner::{Provisioner, ProvisionerOutcome},
    route::{RouteKind, RouteState},
    session,
};
use futures::Future;
use lantern_ecies::util::pk2id;
use lantern_primitives::{NodeRecord, PeerId};
use lantern_wire::{Announce, DisconnectReason};
use secp256k1::{SecretKey, SECP256K1};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, trace, warn};

/// The manager's aggregate connection state, derived from its nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    /// No node is connected or connecting.
    Disconnected,
    /// At least one node is connecting, none is connected yet.
    Connecting,
    /// At least one node is connected.
    Connected,
}

/// Events the manager delivers to its owner, in order.
#[derive(Debug)]
pub enum NodeManagerEvent {
    /// The aggregate state changed.
    StateChanged(ManagerState),
    /// One route of one node changed state.
    RouteState {
        /// The peer.
        peer: PeerId,
        /// Which route.
        route: RouteKind,
        /// The new state.
        state: RouteState,
    },
    /// A provision completed or failed.
    Provision(ProvisionResult),
    /// Discovery produced new peer records.
    Neighbours(Vec<NodeRecord>),
    /// A peer announced a new head.
    Announce {
        /// The announcing peer.
        peer: PeerId,
        /// The announcement.
        announce: Announce,
    },
    /// A peer disconnected us, with its stated reason.
    Disconnected {
        /// The peer.
        peer: PeerId,
        /// The peer's stated reason.
        reason: DisconnectReason,
    },
}

/// Commands a [`NodeManagerHandle`] sends to the manager.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Submit a provision.
    Submit {
        /// Caller-level identifier echoed in the result.
        id: ProvisionId,
        /// The request.
        provision: Provision,
    },
    /// Add a peer to the candidate pool.
    AddPeer(NodeRecord),
    /// Disconnect one route of a peer (a locally requested disconnect).
    DisconnectPeer {
        /// The peer.
        peer: PeerId,
        /// Which route.
        route: RouteKind,
    },
    /// Query connected peers for more neighbours.
    FindPeers,
    /// Disconnect everything and stop.
    Shutdown,
}

/// Cloneable handle for talking to a running [`NodeManager`].
#[derive(Clone, Debug)]
pub struct NodeManagerHandle {
    to_manager: mpsc::UnboundedSender<ManagerCommand>,
}

impl NodeManagerHandle {
    /// Submits a provision; its result arrives as
    /// [`NodeManagerEvent::Provision`] under `id`.
    pub fn submit(&self, id: ProvisionId, provision: Provision) -> Result<(), NetworkError> {
        self.to_manager
            .send(ManagerCommand::Submit { id, provision })
            .map_err(|_| NetworkError::ShutDown)
    }

    /// Adds a peer candidate.
    pub fn add_peer(&self, record: NodeRecord) -> Result<(), NetworkError> {
        self.to_manager.send(ManagerCommand::AddPeer(record)).map_err(|_| NetworkError::ShutDown)
    }

    /// Requests a locally initiated disconnect of one route.
    pub fn disconnect_peer(&self, peer: PeerId, route: RouteKind) -> Result<(), NetworkError> {
        self.to_manager
            .send(ManagerCommand::DisconnectPeer { peer, route })
            .map_err(|_| NetworkError::ShutDown)
    }

    /// Asks connected peers for more neighbours.
    pub fn find_peers(&self) -> Result<(), NetworkError> {
        self.to_manager.send(ManagerCommand::FindPeers).map_err(|_| NetworkError::ShutDown)
    }

    /// Stops the manager.
    pub fn shutdown(&self) -> Result<(), NetworkError> {
        self.to_manager.send(ManagerCommand::Shutdown).map_err(|_| NetworkError::ShutDown)
    }
}

/// Owns the node pool and drives everything; poll it to make progress.
#[must_use = "The NodeManager does nothing unless polled"]
#[derive(Debug)]
pub struct NodeManager {
    config: Arc<ClientConfig>,
    secret_key: SecretKey,
    local_id: PeerId,
    nodes: HashMap<PeerId, Node>,
    /// Discovered records not yet connected.
    candidates: VecDeque<NodeRecord>,
    /// Every identity ever seen, so rediscovery does not duplicate.
    known: HashSet<PeerId>,
    /// Peers dropped for good; reconnection requires rediscovery under a
    /// fresh record.
    failed: HashSet<PeerId>,
    state: ManagerState,
    tasks: JoinSet<()>,
    from_routes_tx: mpsc::UnboundedSender<(PeerId, NodeEvent)>,
    from_routes_rx: mpsc::UnboundedReceiver<(PeerId, NodeEvent)>,
    from_handle_rx: mpsc::UnboundedReceiver<ManagerCommand>,
    events_tx: mpsc::UnboundedSender<NodeManagerEvent>,
    /// Provisions waiting for a usable node.
    pending: VecDeque<(ProvisionId, Provision)>,
}

// === impl NodeManager ===

impl NodeManager {
    /// Creates a manager for the given identity key and boot peers. Returns
    /// the manager future, the command handle and the event stream.
    pub fn new(
        config: ClientConfig,
        secret_key: SecretKey,
        boot_nodes: Vec<NodeRecord>,
    ) -> (Self, NodeManagerHandle, mpsc::UnboundedReceiver<NodeManagerEvent>) {
        let (from_routes_tx, from_routes_rx) = mpsc::unbounded_channel();
        let (handle_tx, from_handle_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let local_id = pk2id(&secret_key.public_key(SECP256K1));
        let mut known = HashSet::new();
        let mut candidates = VecDeque::new();
        for record in boot_nodes {
            if known.insert(record.id) {
                candidates.push_back(record);
            }
        }

        let manager = Self {
            config: Arc::new(config),
            secret_key,
            local_id,
            nodes: HashMap::new(),
            candidates,
            known,
            failed: HashSet::new(),
            state: ManagerState::Disconnected,
            tasks: JoinSet::new(),
            from_routes_tx,
            from_routes_rx,
            from_handle_rx,
            events_tx,
            pending: VecDeque::new(),
        };
        (manager, NodeManagerHandle { to_manager: handle_tx }, events_rx)
    }

    /// Our own identity on the network.
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// The current aggregate state.
    pub fn state(&self) -> ManagerState {
        self.state
    }

    fn emit(&self, event: NodeManagerEvent) {
        let _ = self.events_tx.send(event);
    }

    fn spawn_node(&mut self, record: NodeRecord) {
        trace!(target: "client::manager", peer = %record.id, "spawning node");
        let mut node = Node::new(record);

        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (disc_tx, disc_rx) = mpsc::unbounded_channel();
        node.to_session = Some(session_tx);
        node.to_disc = Some(disc_tx);

        self.tasks.spawn(session::run(
            record,
            self.secret_key,
            Arc::clone(&self.config),
            session_rx,
            self.from_routes_tx.clone(),
        ));
        self.tasks.spawn(discroute::run(
            record,
            self.secret_key,
            Arc::clone(&self.config),
            disc_rx,
            self.from_routes_tx.clone(),
        ));

        self.nodes.insert(record.id, node);
    }

    /// Tops the pool up from the candidate queue.
    fn fill_pool(&mut self) {
        while self.nodes.len() < self.config.max_peers {
            let Some(record) = self.candidates.pop_front() else { break };
            if self.failed.contains(&record.id) || self.nodes.contains_key(&record.id) {
                continue
            }
            self.spawn_node(record);
        }
    }

    /// Picks the connected node with the most headroom for a new provision.
    fn pick_node(&mut self) -> Option<PeerId> {
        self.nodes
            .values()
            .filter(|node| node.is_usable())
            .min_by_key(|node| node.inflight())
            .map(|node| node.peer_id())
    }

    fn assign(&mut self, id: ProvisionId, provision: Provision) {
        let Some(peer) = self.pick_node() else {
            trace!(target: "client::manager", ?id, "no usable node, queueing provision");
            self.pending.push_back((id, provision));
            return
        };
        let Some(node) = self.nodes.get_mut(&peer) else { return };
        let Some(capability) = node.capability() else { return };

        let provisioner =
            match Provisioner::establish(id, provision, capability.protocol, node.next_request_id())
            {
                Ok(provisioner) => provisioner,
                Err(err) => {
                    self.emit(NodeManagerEvent::Provision(ProvisionResult {
                        id,
                        peer: Some(peer),
                        result: Err(err),
                    }));
                    return
                }
            };

        let mut provisioner = provisioner;
        let messages = provisioner.take_messages();

        // advisory credit check: a node without headroom is marked
        // exhausted and the provision moves on to another node
        let cost: u64 = messages.iter().map(|message| node.estimate_credits(message)).sum();
        if cost > 0 && node.credits().remaining() < cost {
            debug!(target: "client::manager", peer = %peer, cost, "node exhausted");
            node.set_exhausted();
            let (id, provision) = provisioner.abort();
            self.emit(NodeManagerEvent::RouteState {
                peer,
                route: RouteKind::Tcp,
                state: self.nodes[&peer].route_state(RouteKind::Tcp),
            });
            if let Some(provision) = provision {
                self.assign(id, provision);
            }
            return
        }

        for message in messages {
            if !node.send(message) {
                let (id, _) = provisioner.abort();
                self.emit(NodeManagerEvent::Provision(ProvisionResult {
                    id,
                    peer: Some(peer),
                    result: Err(ProvisionError::SendFailed),
                }));
                return
            }
        }
        node.push_provisioner(provisioner);
    }

    fn drain_pending(&mut self) {
        if self.pick_node().is_none() {
            return
        }
        let pending = std::mem::take(&mut self.pending);
        for (id, provision) in pending {
            self.assign(id, provision);
        }
    }

    /// Fails every in-flight provisioner of a dead node over to the caller.
    fn fail_provisioners(&mut self, peer: PeerId, state: RouteState) {
        let Some(node) = self.nodes.get_mut(&peer) else { return };
        for provisioner in node.take_provisioners() {
            let (id, _) = provisioner.abort();
            let result = match state {
                RouteState::ErrorDisconnect(reason) => {
                    ProvisionError::Disconnected { reason: Some(reason) }
                }
                RouteState::ErrorProtocol(err) => ProvisionError::NodeFailed(err),
                _ => ProvisionError::Disconnected { reason: None },
            };
            self.emit(NodeManagerEvent::Provision(ProvisionResult {
                id,
                peer: Some(peer),
                result: Err(result),
            }));
        }
    }

    fn on_node_event(&mut self, peer: PeerId, event: NodeEvent) {
        match event {
            NodeEvent::State { route, state } => {
                let Some(node) = self.nodes.get_mut(&peer) else { return };
                node.set_route_state(route, state);
                self.emit(NodeManagerEvent::RouteState { peer, route, state });

                if route == RouteKind::Tcp {
                    if let RouteState::ErrorDisconnect(reason) = state {
                        self.emit(NodeManagerEvent::Disconnected { peer, reason });
                    }
                    if state.is_error() {
                        // failed peers leave the pool for good
                        self.fail_provisioners(peer, state);
                        self.failed.insert(peer);
                        self.nodes.remove(&peer);
                    }
                }
            }
            NodeEvent::TcpConnected { capability, status } => {
                let Some(node) = self.nodes.get_mut(&peer) else { return };
                node.on_tcp_connected(capability, &status);
                self.emit(NodeManagerEvent::RouteState {
                    peer,
                    route: RouteKind::Tcp,
                    state: RouteState::Connected,
                });
                self.drain_pending();
            }
            NodeEvent::Message(message) => self.on_message(peer, message),
            NodeEvent::Announce(announce) => {
                self.emit(NodeManagerEvent::Announce { peer, announce })
            }
            NodeEvent::Neighbours(records) => {
                let mut fresh = Vec::new();
                for mut record in records {
                    record.convert_ipv4_mapped();
                    if record.id != self.local_id &&
                        !self.failed.contains(&record.id) &&
                        self.known.insert(record.id)
                    {
                        self.candidates.push_back(record);
                        fresh.push(record);
                    }
                }
                if !fresh.is_empty() {
                    self.emit(NodeManagerEvent::Neighbours(fresh));
                }
            }
        }
    }

    /// Routes an inbound response to the provisioner owning its request id.
    fn on_message(&mut self, peer: PeerId, message: lantern_wire::LightMessage) {
        let Some(node) = self.nodes.get_mut(&peer) else { return };
        let Some(request_id) = message.request_id() else {
            trace!(target: "client::manager", peer = %peer, "ignoring unsolicited message");
            return
        };

        // credit echoes ride on every response, newest wins
        if let Some(buffer_value) = message.buffer_value() {
            node.absorb_credits(request_id, buffer_value);
        }

        let Some(provisioner) = node.provisioner_for(request_id) else {
            warn!(
                target: "client::manager",
                peer = %peer,
                request_id,
                "response for unknown request id"
            );
            return
        };
        let id = provisioner.provision_id();

        match provisioner.handle_message(message) {
            Ok(ProvisionerOutcome::Pending) => {}
            Ok(ProvisionerOutcome::Complete(provision)) => {
                node.remove_provisioner(request_id);
                self.emit(NodeManagerEvent::Provision(ProvisionResult {
                    id,
                    peer: Some(peer),
                    result: Ok(*provision),
                }));
            }
            Err(err) => {
                // a data error stops at this provisioner; the node lives on
                node.remove_provisioner(request_id);
                self.emit(NodeManagerEvent::Provision(ProvisionResult {
                    id,
                    peer: Some(peer),
                    result: Err(err),
                }));
            }
        }
    }

    fn on_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::Submit { id, provision } => self.assign(id, provision),
            ManagerCommand::AddPeer(record) => {
                if record.id != self.local_id &&
                    !self.failed.contains(&record.id) &&
                    self.known.insert(record.id)
                {
                    self.candidates.push_back(record);
                }
            }
            ManagerCommand::DisconnectPeer { peer, route } => {
                if let Some(node) = self.nodes.get_mut(&peer) {
                    node.disconnect(route, true, None);
                    let state = node.route_state(route);
                    self.emit(NodeManagerEvent::RouteState { peer, route, state });
                    if route == RouteKind::Tcp {
                        self.fail_provisioners(peer, state);
                        self.nodes.remove(&peer);
                    }
                }
            }
            ManagerCommand::FindPeers => {
                for node in self.nodes.values() {
                    if let Some(tx) = &node.to_disc {
                        let _ = tx.send(DiscCommand::FindNode(self.local_id));
                    }
                }
            }
            ManagerCommand::Shutdown => {
                debug!(target: "client::manager", "shutting down");
                let peers: Vec<_> = self.nodes.keys().copied().collect();
                for peer in peers {
                    if let Some(node) = self.nodes.get_mut(&peer) {
                        node.disconnect(RouteKind::Tcp, true, None);
                        node.disconnect(RouteKind::Udp, true, None);
                    }
                    self.fail_provisioners(peer, RouteState::Available);
                }
                self.nodes.clear();
                for (id, _) in std::mem::take(&mut self.pending) {
                    self.emit(NodeManagerEvent::Provision(ProvisionResult {
                        id,
                        peer: None,
                        result: Err(ProvisionError::SendFailed),
                    }));
                }
                return true
            }
        }
        false
    }

    fn update_state(&mut self) {
        let connected = self.nodes.values().any(|n| n.route_state(RouteKind::Tcp).is_connected());
        let connecting =
            self.nodes.values().any(|n| n.route_state(RouteKind::Tcp).is_connecting());
        let next = if connected {
            ManagerState::Connected
        } else if connecting {
            ManagerState::Connecting
        } else {
            ManagerState::Disconnected
        };
        if next != self.state {
            self.state = next;
            self.emit(NodeManagerEvent::StateChanged(next));
        }
    }
}

impl Future for NodeManager {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            let mut progressed = false;

            // commands first: locally requested disconnects and shutdown
            // jump ahead of buffered route events
            match this.from_handle_rx.poll_recv(cx) {
                Poll::Ready(Some(command)) => {
                    progressed = true;
                    if this.on_command(command) {
                        return Poll::Ready(())
                    }
                }
                Poll::Ready(None) => return Poll::Ready(()),
                Poll::Pending => {}
            }

            match this.from_routes_rx.poll_recv(cx) {
                Poll::Ready(Some((peer, event))) => {
                    progressed = true;
                    this.on_node_event(peer, event);
                }
                // the manager owns a sender half, so this cannot end
                Poll::Ready(None) => {}
                Poll::Pending => {}
            }

            // reap finished route tasks so the join set stays bounded
            while let Poll::Ready(Some(_)) = this.tasks.poll_join_next(cx) {}

            this.fill_pool();
            this.update_state();

            if !progressed {
                return Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn test_manager() -> (NodeManager, NodeManagerHandle, mpsc::UnboundedReceiver<NodeManagerEvent>)
    {
        let config = ClientConfig::builder(1, B256::repeat_byte(0x01)).build();
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        NodeManager::new(config, secret_key, Vec::new())
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let (manager, _handle, _events) = test_manager();
        assert_eq!(manager.state(), ManagerState::Disconnected);
    }

    #[tokio::test]
    async fn submit_without_peers_queues_until_shutdown() {
        let (manager, handle, mut events) = test_manager();
        let driver = tokio::spawn(manager);

        handle.submit(ProvisionId(7), Provision::headers(0, 0, 3, false)).unwrap();
        handle.shutdown().unwrap();

        // the queued provision is failed over to the caller on shutdown
        let event = events.recv().await.expect("provision failure event");
        match event {
            NodeManagerEvent::Provision(result) => {
                assert_eq!(result.id, ProvisionId(7));
                assert!(matches!(result.result, Err(ProvisionError::SendFailed)));
            }
            other => panic!("expected provision event, got {other:?}"),
        }

        driver.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_candidates_are_ignored() {
        let (mut manager, _handle, _events) = test_manager();
        let record = NodeRecord::new("127.0.0.1:30303".parse().unwrap(), PeerId::repeat_byte(2));
        assert!(!manager.on_command(ManagerCommand::AddPeer(record)));
        assert!(!manager.on_command(ManagerCommand::AddPeer(record)));
        assert_eq!(manager.candidates.len(), 1);
    }
}
