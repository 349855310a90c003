//! The UDP route task: the ping/pong liveness exchange, then find-node
//! service for peer discovery.

use crate::{
    config::ClientConfig,
    node::NodeEvent,
    route::{libc_consts, ConnectStep, ProtocolError, RouteKind, RouteState},
};
use lantern_disc::{DiscMessage, Endpoint, FindNodeMessage, PingMessage, PongMessage, MAX_PACKET_SIZE};
use lantern_primitives::{NodeRecord, PeerId};
use secp256k1::SecretKey;
use std::{
    io,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{net::UdpSocket, sync::mpsc, time::timeout};
use tracing::{debug, trace};

/// Commands the manager sends to a discovery route task.
#[derive(Debug)]
pub(crate) enum DiscCommand {
    /// Ask the peer for neighbours close to the target.
    FindNode(PeerId),
}

fn errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc_consts::ECONNRESET)
}

fn expiration() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() +
        60
}

/// Receives one datagram, enforcing the packet bound: a datagram larger
/// than the protocol cap is a protocol error, not a truncation.
async fn recv_packet(socket: &UdpSocket) -> Result<lantern_disc::Packet, RouteState> {
    let mut buf = [0u8; MAX_PACKET_SIZE + 1];
    let read = socket
        .recv(&mut buf)
        .await
        .map_err(|err| RouteState::ErrorUnix(errno(&err)))?;
    if read > MAX_PACKET_SIZE {
        return Err(RouteState::ErrorProtocol(ProtocolError::ExcessiveByteCount))
    }
    DiscMessage::decode_packet(&buf[..read])
        .map_err(|_| RouteState::ErrorProtocol(ProtocolError::PingPongMissed))
}

/// Runs the UDP route of one peer.
pub(crate) async fn run(
    record: NodeRecord,
    secret_key: SecretKey,
    config: Arc<ClientConfig>,
    mut commands: mpsc::UnboundedReceiver<DiscCommand>,
    events: mpsc::UnboundedSender<(PeerId, NodeEvent)>,
) {
    let peer = record.id;
    let state = |state: RouteState| (peer, NodeEvent::State { route: RouteKind::Udp, state });
    let step = config.step_timeout;

    if record.udp_port == 0 {
        let _ = events.send(state(RouteState::ErrorProtocol(ProtocolError::InvalidPort)));
        return
    }

    // open a connected socket so recv only sees this peer
    let _ = events.send(state(RouteState::Connecting(ConnectStep::Open)));
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(err) => {
            let _ = events.send(state(RouteState::ErrorUnix(errno(&err))));
            return
        }
    };
    if let Err(err) = socket.connect(record.udp_addr()).await {
        let _ = events.send(state(RouteState::ErrorUnix(errno(&err))));
        return
    }

    let local_endpoint = Endpoint::from_udp_addr(
        socket.local_addr().unwrap_or_else(|_| "0.0.0.0:0".parse().expect("valid addr")),
        config.port,
    );
    let remote_endpoint: Endpoint = record.into();

    // ping
    let ping = DiscMessage::Ping(PingMessage {
        from: local_endpoint,
        to: remote_endpoint,
        expire: expiration(),
    });
    let ping_raw = ping.encode_packet(&secret_key);
    if let Err(err) = socket.send(&ping_raw).await {
        let _ = events.send(state(RouteState::ErrorUnix(errno(&err))));
        return
    }

    // the peer must answer with a pong ...
    let _ = events.send(state(RouteState::Connecting(ConnectStep::AwaitingPong)));
    match timeout(step, recv_packet(&socket)).await {
        Ok(Ok(packet)) => match packet.message {
            DiscMessage::Pong(_) => {}
            other => {
                trace!(target: "client::disc", peer = %peer, ?other, "expected pong");
                let _ =
                    events.send(state(RouteState::ErrorProtocol(ProtocolError::PingPongMissed)));
                return
            }
        },
        Ok(Err(failure)) => {
            let _ = events.send(state(failure));
            return
        }
        Err(_) => {
            let _ = events.send(state(RouteState::ErrorUnix(libc_consts::ETIMEDOUT)));
            return
        }
    }

    // ... and probe us with its own ping, which we answer
    let _ = events.send(state(RouteState::Connecting(ConnectStep::AwaitingPing)));
    match timeout(step, recv_packet(&socket)).await {
        Ok(Ok(packet)) => match packet.message {
            DiscMessage::Ping(_) => {
                let pong = DiscMessage::Pong(PongMessage {
                    to: remote_endpoint,
                    echo: packet.hash,
                    expire: expiration(),
                });
                if let Err(err) = socket.send(&pong.encode_packet(&secret_key)).await {
                    let _ = events.send(state(RouteState::ErrorUnix(errno(&err))));
                    return
                }
            }
            other => {
                trace!(target: "client::disc", peer = %peer, ?other, "expected ping");
                let _ =
                    events.send(state(RouteState::ErrorProtocol(ProtocolError::PingPongMissed)));
                return
            }
        },
        Ok(Err(failure)) => {
            let _ = events.send(state(failure));
            return
        }
        Err(_) => {
            let _ = events.send(state(RouteState::ErrorUnix(libc_consts::ETIMEDOUT)));
            return
        }
    }

    let _ = events.send(state(RouteState::Connected));
    trace!(target: "client::disc", peer = %peer, "udp route connected");

    // discovery service loop
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(DiscCommand::FindNode(target)) => {
                    let find = DiscMessage::FindNode(FindNodeMessage {
                        target,
                        expire: expiration(),
                    });
                    if let Err(err) = socket.send(&find.encode_packet(&secret_key)).await {
                        let _ = events.send(state(RouteState::ErrorUnix(errno(&err))));
                        return
                    }
                }
                None => return,
            },
            packet = recv_packet(&socket) => match packet {
                Ok(packet) => match packet.message {
                    DiscMessage::Ping(_) => {
                        let pong = DiscMessage::Pong(PongMessage {
                            to: remote_endpoint,
                            echo: packet.hash,
                            expire: expiration(),
                        });
                        let _ = socket.send(&pong.encode_packet(&secret_key)).await;
                    }
                    DiscMessage::Neighbours(neighbours) => {
                        let _ = events.send((peer, NodeEvent::Neighbours(neighbours.nodes)));
                    }
                    // stray pongs and queries are not ours to answer
                    DiscMessage::Pong(_) | DiscMessage::FindNode(_) => {}
                },
                Err(failure) => {
                    debug!(target: "client::disc", peer = %peer, ?failure, "udp route failed");
                    let _ = events.send(state(failure));
                    return
                }
            },
        }
    }
}
