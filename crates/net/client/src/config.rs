//! Client configuration.

use alloy_primitives::{B256, U256};
use lantern_wire::{Capability, LightStatus};
use std::time::Duration;

/// Everything a [`NodeManager`](crate::NodeManager) needs to know about the
/// chain it serves and how to behave on the network.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The chain id of the network to join.
    pub network_id: u64,
    /// The genesis hash peers must agree on.
    pub genesis_hash: B256,
    /// The trusted head hash announced in our status.
    pub head_hash: B256,
    /// The trusted head number announced in our status.
    pub head_number: u64,
    /// The trusted total difficulty announced in our status.
    pub head_td: U256,
    /// The capabilities offered in our Hello; a peer must share one.
    pub capabilities: Vec<Capability>,
    /// Maximum number of concurrently connected nodes.
    pub max_peers: usize,
    /// Bound on every individual connect/handshake step.
    pub step_timeout: Duration,
    /// The TCP port advertised in Hello; zero when not listening.
    pub port: u16,
}

impl ClientConfig {
    /// Starts building a config for the given network and genesis.
    pub fn builder(network_id: u64, genesis_hash: B256) -> ClientConfigBuilder {
        ClientConfigBuilder {
            network_id,
            genesis_hash,
            head_hash: genesis_hash,
            head_number: 0,
            head_td: U256::ZERO,
            capabilities: None,
            max_peers: None,
            step_timeout: None,
            port: 0,
        }
    }

    /// The status message announced to peers.
    pub fn status(&self) -> LightStatus {
        LightStatus::builder()
            .network(self.network_id)
            .head(self.head_hash, self.head_number, self.head_td)
            .genesis(self.genesis_hash)
            .build()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    network_id: u64,
    genesis_hash: B256,
    head_hash: B256,
    head_number: u64,
    head_td: U256,
    capabilities: Option<Vec<Capability>>,
    max_peers: Option<usize>,
    step_timeout: Option<Duration>,
    port: u16,
}

impl ClientConfigBuilder {
    /// Sets the trusted head the client announces.
    pub fn head(mut self, hash: B256, number: u64, td: U256) -> Self {
        self.head_hash = hash;
        self.head_number = number;
        self.head_td = td;
        self
    }

    /// Sets the capabilities offered to peers.
    pub fn capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Bounds the connected-node pool.
    pub fn max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = Some(max_peers);
        self
    }

    /// Bounds each connect/handshake step.
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Sets the advertised TCP port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Finalizes the config. Defaults: both light capabilities, a pool of
    /// five nodes, one second per handshake step.
    pub fn build(self) -> ClientConfig {
        let Self {
            network_id,
            genesis_hash,
            head_hash,
            head_number,
            head_td,
            capabilities,
            max_peers,
            step_timeout,
            port,
        } = self;
        ClientConfig {
            network_id,
            genesis_hash,
            head_hash,
            head_number,
            head_td,
            capabilities: capabilities
                .unwrap_or_else(|| vec![Capability::les(2), Capability::pip(1)]),
            max_peers: max_peers.unwrap_or(5),
            step_timeout: step_timeout.unwrap_or(Duration::from_secs(1)),
            port,
        }
    }
}
