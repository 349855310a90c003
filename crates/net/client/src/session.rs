//! The TCP route task: dial, encrypted handshake, Hello, Status, then the
//! request/response loop.
//!
//! Every step of the connect sequence runs under its own bounded timeout
//! and reports the precise failure state. The task owns the socket; it ends
//! (and closes the socket) when the connection dies or the command channel
//! is dropped.

use crate::{
    config::ClientConfig,
    node::NodeEvent,
    route::{libc_consts, ConnectStep, ProtocolError, RouteKind, RouteState},
};
use futures::{SinkExt, StreamExt};
use lantern_ecies::{stream::ECIESStream, util::pk2id};
use lantern_primitives::{NodeRecord, PeerId};
use lantern_wire::{
    errors::{LightHandshakeError, LightStreamError, P2PHandshakeError, P2PStreamError},
    DisconnectReason, HelloMessage, LightMessage, UnauthedLightStream, UnauthedP2PStream,
};
use secp256k1::{SecretKey, SECP256K1};
use std::{io, sync::Arc};
use tokio::{net::TcpStream, sync::mpsc, time::timeout};
use tracing::{debug, trace};

/// Commands the manager sends to a session task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Encode and send one message.
    Send(LightMessage),
    /// Announce the disconnect to the peer and end the session.
    Disconnect(DisconnectReason),
}

fn errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(match err.kind() {
        io::ErrorKind::TimedOut => libc_consts::ETIMEDOUT,
        _ => libc_consts::ECONNRESET,
    })
}

/// Runs the TCP route of one peer to completion.
pub(crate) async fn run(
    record: NodeRecord,
    secret_key: SecretKey,
    config: Arc<ClientConfig>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<(PeerId, NodeEvent)>,
) {
    let peer = record.id;
    let state = |state: RouteState| (peer, NodeEvent::State { route: RouteKind::Tcp, state });
    let step = config.step_timeout;

    if record.tcp_port == 0 {
        let _ = events.send(state(RouteState::ErrorProtocol(ProtocolError::InvalidPort)));
        return
    }

    // open
    let _ = events.send(state(RouteState::Connecting(ConnectStep::Open)));
    let stream = match timeout(step, TcpStream::connect(record.tcp_addr())).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            let _ = events.send(state(RouteState::ErrorUnix(errno(&err))));
            return
        }
        Err(_) => {
            let _ = events.send(state(RouteState::ErrorUnix(libc_consts::ETIMEDOUT)));
            return
        }
    };

    // authenticated key exchange
    let _ = events.send(state(RouteState::Connecting(ConnectStep::AuthHandshake)));
    let stream = match timeout(step, ECIESStream::connect(stream, secret_key, peer)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            debug!(target: "client::session", peer = %peer, %err, "ecies handshake failed");
            let _ =
                events.send(state(RouteState::ErrorProtocol(ProtocolError::TcpAuthentication)));
            return
        }
        Err(_) => {
            let _ = events.send(state(RouteState::ErrorUnix(libc_consts::ETIMEDOUT)));
            return
        }
    };

    // hello / capability negotiation
    let _ = events.send(state(RouteState::Connecting(ConnectStep::Hello)));
    let hello = HelloMessage::builder(pk2id(&secret_key.public_key(SECP256K1)))
        .capabilities(config.capabilities.clone())
        .port(config.port)
        .build();
    let (p2p_stream, _their_hello) =
        match timeout(step, UnauthedP2PStream::new(stream).handshake(hello)).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(err)) => {
                let failure = match &err {
                    P2PStreamError::HandshakeError(P2PHandshakeError::NoSharedCapability) => {
                        RouteState::ErrorProtocol(ProtocolError::CapabilitiesMismatch)
                    }
                    err => match err.as_disconnected() {
                        Some(reason) => RouteState::ErrorDisconnect(reason),
                        None => RouteState::ErrorProtocol(ProtocolError::TcpHello),
                    },
                };
                debug!(target: "client::session", peer = %peer, %err, "hello exchange failed");
                let _ = events.send(state(failure));
                return
            }
            Err(_) => {
                let _ = events.send(state(RouteState::ErrorUnix(libc_consts::ETIMEDOUT)));
                return
            }
        };
    let shared = p2p_stream.shared_capability();

    // status
    let _ = events.send(state(RouteState::Connecting(ConnectStep::Status)));
    let unauthed = UnauthedLightStream::new(p2p_stream, shared);
    let (mut light_stream, their_status) =
        match timeout(step, unauthed.handshake(config.status())).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(err)) => {
                let failure = match &err {
                    LightStreamError::HandshakeError(
                        LightHandshakeError::MismatchedGenesis { .. } |
                        LightHandshakeError::MismatchedNetwork { .. },
                    ) => RouteState::ErrorProtocol(ProtocolError::NetworkMismatch),
                    err => match err.as_disconnected() {
                        Some(reason) => RouteState::ErrorDisconnect(reason),
                        None => RouteState::ErrorProtocol(ProtocolError::TcpStatus),
                    },
                };
                debug!(target: "client::session", peer = %peer, %err, "status exchange failed");
                let _ = events.send(state(failure));
                return
            }
            Err(_) => {
                let _ = events.send(state(RouteState::ErrorUnix(libc_consts::ETIMEDOUT)));
                return
            }
        };

    trace!(target: "client::session", peer = %peer, status = %their_status, "session established");
    let _ = events.send((
        peer,
        NodeEvent::TcpConnected { capability: shared, status: Box::new(their_status) },
    ));

    // request/response loop: commands in, messages out, in arrival order
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::Send(message)) => {
                    if let Err(err) = light_stream.send(message).await {
                        debug!(target: "client::session", peer = %peer, %err, "send failed");
                        let failure = match err.as_io() {
                            Some(io_err) => RouteState::ErrorUnix(errno(io_err)),
                            None => RouteState::ErrorProtocol(ProtocolError::Breach),
                        };
                        let _ = events.send(state(failure));
                        return
                    }
                }
                Some(SessionCommand::Disconnect(reason)) => {
                    // locally requested teardown: tell the peer, close the
                    // socket by dropping the stream
                    let _ = light_stream.inner_mut().disconnect(reason).await;
                    return
                }
                // manager dropped the node
                None => return,
            },
            message = light_stream.next() => match message {
                Some(Ok(message)) => match message {
                    LightMessage::Announce(announce) => {
                        let _ = events.send((peer, NodeEvent::Announce(announce)));
                    }
                    message => {
                        let _ = events.send((peer, NodeEvent::Message(message)));
                    }
                },
                Some(Err(err)) => {
                    debug!(target: "client::session", peer = %peer, %err, "session failed");
                    let failure = match err.as_disconnected() {
                        Some(reason) => RouteState::ErrorDisconnect(reason),
                        None => match err.as_io() {
                            Some(io_err) => RouteState::ErrorUnix(errno(io_err)),
                            None => RouteState::ErrorProtocol(ProtocolError::Breach),
                        },
                    };
                    let _ = events.send(state(failure));
                    return
                }
                None => {
                    // remote closed without a disconnect message
                    let _ = events.send(state(RouteState::ErrorUnix(libc_consts::ECONNRESET)));
                    return
                }
            },
        }
    }
}
