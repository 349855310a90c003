//! Per-route connection state.
//!
//! Each node has two routes, UDP discovery and the encrypted TCP protocol
//! connection, with independent state machines. The sum types here make the
//! legal transitions exhaustive: there is no unhandled-state fall-through.

use lantern_wire::DisconnectReason;
use std::time::Instant;

/// The two routes of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteKind {
    /// The UDP discovery route.
    Udp,
    /// The TCP sub-protocol route.
    Tcp,
}

/// The step a connecting route is currently in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectStep {
    /// Opening the socket.
    Open,
    /// UDP: ping sent, awaiting the peer's pong.
    AwaitingPong,
    /// UDP: pong received, awaiting the peer-initiated ping.
    AwaitingPing,
    /// TCP: running the encrypted-transport key exchange.
    AuthHandshake,
    /// TCP: exchanging Hello and negotiating capabilities.
    Hello,
    /// TCP: exchanging Status.
    Status,
}

/// A protocol violation that terminates a connection attempt.
///
/// Some of these are permanent verdicts about the peer and should not be
/// retried by the orchestration layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The peer advertised an unusable port.
    #[error("peer advertised an invalid port")]
    InvalidPort,
    /// The UDP ping/pong exchange produced an unexpected message.
    #[error("udp ping/pong exchange missed")]
    PingPongMissed,
    /// A datagram exceeded the protocol bound.
    #[error("udp datagram exceeds the packet cap")]
    ExcessiveByteCount,
    /// The encrypted-transport key exchange failed.
    #[error("tcp authentication failed")]
    TcpAuthentication,
    /// The Hello exchange failed.
    #[error("tcp hello exchange failed")]
    TcpHello,
    /// The Status exchange failed.
    #[error("tcp status exchange failed")]
    TcpStatus,
    /// The peer does not serve a capability we require.
    #[error("capabilities mismatch")]
    CapabilitiesMismatch,
    /// The peer serves a different network or chain.
    #[error("network mismatch")]
    NetworkMismatch,
    /// The peer broke the sub-protocol after the handshake.
    #[error("sub-protocol breach")]
    Breach,
}

impl ProtocolError {
    /// Whether the orchestration layer may usefully retry this peer later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidPort | Self::CapabilitiesMismatch | Self::NetworkMismatch => false,
            Self::PingPongMissed |
            Self::ExcessiveByteCount |
            Self::TcpAuthentication |
            Self::TcpHello |
            Self::TcpStatus |
            Self::Breach => true,
        }
    }
}

/// The state of one route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteState {
    /// Idle; the route can be connected.
    Available,
    /// Mid-connection, at the given step.
    Connecting(ConnectStep),
    /// Fully connected. For TCP this implies the key exchange, Hello and
    /// Status all completed.
    Connected,
    /// The peer's credit allowance is spent; usable again after an explicit
    /// disconnect and reconnect.
    Exhausted {
        /// When the route was exhausted.
        since: Instant,
    },
    /// The route failed with a transport error.
    ErrorUnix(i32),
    /// The peer disconnected, with its stated reason.
    ErrorDisconnect(DisconnectReason),
    /// The route failed with a protocol violation.
    ErrorProtocol(ProtocolError),
}

impl RouteState {
    /// Whether the route is in any terminal error state.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ErrorUnix(_) | Self::ErrorDisconnect(_) | Self::ErrorProtocol(_)
        )
    }

    /// Whether the route can start a new connection attempt.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    /// Whether the route is connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the route is connecting.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting(_))
    }

    /// Applies a disconnect. A locally requested disconnect always lands in
    /// [`RouteState::Available`], whatever the prior state; an unrequested
    /// one records why the route died.
    pub fn disconnected(self, requested: bool, reason: Option<DisconnectReason>) -> Self {
        if requested {
            return Self::Available
        }
        match reason {
            Some(reason) => Self::ErrorDisconnect(reason),
            None => match self {
                // keep an existing error verdict
                state if state.is_error() => state,
                _ => Self::ErrorUnix(libc_consts::ECONNRESET),
            },
        }
    }
}

/// The errno values this crate reports for conditions it detects itself.
pub(crate) mod libc_consts {
    pub(crate) const ETIMEDOUT: i32 = 110;
    pub(crate) const ECONNRESET: i32 = 104;
}
