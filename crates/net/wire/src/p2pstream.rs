//! The base `p2p` protocol: Hello exchange, capability negotiation,
//! keepalive pings and disconnects, multiplexed below the light
//! sub-protocol.

use crate::{
    capability::{SharedCapability, MAX_RESERVED_MESSAGE_ID},
    errors::{P2PHandshakeError, P2PStreamError},
    DisconnectReason, HelloMessage,
};
use alloy_rlp::{Decodable, Encodable, EMPTY_LIST_CODE};
use bytes::{Buf, Bytes, BytesMut};
use futures::{ready, Sink, SinkExt, StreamExt};
use pin_project::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio_stream::Stream;
use tracing::{debug, trace};

/// [`MAX_PAYLOAD_SIZE`] is the maximum size of an uncompressed message body.
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// The interval at which keepalive pings are sent, which doubles as the
/// deadline for the matching pong.
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// A message on the base `p2p` capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum P2PMessage {
    /// The first packet sent over the connection, and sent once by both sides.
    Hello(HelloMessage),
    /// Inform the peer that a disconnection is imminent.
    Disconnect(DisconnectReason),
    /// Requests an immediate reply of [`P2PMessage::Pong`] from the peer.
    Ping,
    /// Reply to the peer's [`P2PMessage::Ping`] packet.
    Pong,
}

impl P2PMessage {
    /// The message id of the message
    pub fn message_id(&self) -> P2PMessageID {
        match self {
            P2PMessage::Hello(_) => P2PMessageID::Hello,
            P2PMessage::Disconnect(_) => P2PMessageID::Disconnect,
            P2PMessage::Ping => P2PMessageID::Ping,
            P2PMessage::Pong => P2PMessageID::Pong,
        }
    }
}

impl Encodable for P2PMessage {
    /// The [`P2PMessage::Ping`] and [`P2PMessage::Pong`] messages are
    /// encoded as an id followed by an empty list.
    fn encode(&self, out: &mut dyn bytes::BufMut) {
        (self.message_id() as u8).encode(out);
        match self {
            P2PMessage::Hello(msg) => msg.encode(out),
            P2PMessage::Disconnect(msg) => msg.encode(out),
            P2PMessage::Ping | P2PMessage::Pong => out.put_u8(EMPTY_LIST_CODE),
        }
    }

    fn length(&self) -> usize {
        let payload_len = match self {
            P2PMessage::Hello(msg) => msg.length(),
            P2PMessage::Disconnect(msg) => msg.length(),
            P2PMessage::Ping | P2PMessage::Pong => 1,
        };
        payload_len + 1
    }
}

impl Decodable for P2PMessage {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let message_id = u8::decode(&mut &buf[..])?;
        let id = P2PMessageID::try_from(message_id)
            .map_err(|_| alloy_rlp::Error::Custom("unknown p2p message id"))?;
        buf.advance(1);
        match id {
            P2PMessageID::Hello => Ok(P2PMessage::Hello(HelloMessage::decode(buf)?)),
            P2PMessageID::Disconnect => Ok(P2PMessage::Disconnect(DisconnectReason::decode(buf)?)),
            P2PMessageID::Ping => {
                if buf.has_remaining() {
                    buf.advance(1);
                }
                Ok(P2PMessage::Ping)
            }
            P2PMessageID::Pong => {
                if buf.has_remaining() {
                    buf.advance(1);
                }
                Ok(P2PMessage::Pong)
            }
        }
    }
}

/// Message ids for the base `p2p` capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum P2PMessageID {
    /// Message ID for the [`P2PMessage::Hello`] message.
    Hello = 0x00,
    /// Message ID for the [`P2PMessage::Disconnect`] message.
    Disconnect = 0x01,
    /// Message ID for the [`P2PMessage::Ping`] message.
    Ping = 0x02,
    /// Message ID for the [`P2PMessage::Pong`] message.
    Pong = 0x03,
}

impl TryFrom<u8> for P2PMessageID {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(P2PMessageID::Hello),
            0x01 => Ok(P2PMessageID::Disconnect),
            0x02 => Ok(P2PMessageID::Ping),
            0x03 => Ok(P2PMessageID::Pong),
            _ => Err(value),
        }
    }
}

/// An unauthenticated `p2p` stream: the underlying transport is encrypted
/// but the Hello exchange has not happened yet. Consumed by
/// [`UnauthedP2PStream::handshake`].
#[pin_project]
#[derive(Debug)]
pub struct UnauthedP2PStream<S> {
    #[pin]
    inner: S,
}

impl<S> UnauthedP2PStream<S> {
    /// Create a new `UnauthedP2PStream` from a type `S` which implements
    /// `Stream` and `Sink`.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> UnauthedP2PStream<S>
where
    S: Stream<Item = std::io::Result<BytesMut>> + Sink<Bytes, Error = std::io::Error> + Unpin,
{
    /// Consumes the [`UnauthedP2PStream`] and returns a [`P2PStream`] after
    /// the Hello handshake is completed successfully. Also returns the Hello
    /// message sent by the remote peer.
    pub async fn handshake(
        mut self,
        hello: HelloMessage,
    ) -> Result<(P2PStream<S>, HelloMessage), P2PStreamError> {
        trace!(?hello, "sending p2p hello ...");

        let mut raw_hello_bytes = BytesMut::new();
        P2PMessage::Hello(hello.clone()).encode(&mut raw_hello_bytes);
        self.inner.send(raw_hello_bytes.freeze()).await?;

        trace!("waiting for p2p hello from peer ...");
        let first_message_bytes = tokio::time::timeout(Duration::from_secs(10), self.inner.next())
            .await
            .or(Err(P2PStreamError::HandshakeError(P2PHandshakeError::Timeout)))?
            .ok_or(P2PStreamError::HandshakeError(P2PHandshakeError::NoResponse))??;

        // The first message sent MUST be a hello OR disconnect message
        let their_hello = match P2PMessage::decode(&mut first_message_bytes.as_ref()) {
            Ok(P2PMessage::Hello(hello)) => Ok(hello),
            Ok(P2PMessage::Disconnect(reason)) => {
                debug!(?reason, "Disconnected by peer during handshake");
                Err(P2PStreamError::HandshakeError(P2PHandshakeError::Disconnected(reason)))
            }
            Err(err) => {
                debug!(?err, msg=%alloy_primitives::hex::encode(&first_message_bytes), "Failed to decode first message from peer");
                Err(P2PStreamError::HandshakeError(err.into()))
            }
            Ok(msg) => {
                debug!(?msg, "expected hello message but received another message");
                Err(P2PStreamError::HandshakeError(P2PHandshakeError::NonHelloMessageInHandshake))
            }
        }?;

        trace!(
            hello = ?their_hello,
            "validating incoming p2p hello from peer"
        );

        // determine the shared light capability and its message id offset
        let shared_capability = match SharedCapability::try_negotiate(
            &hello.capabilities,
            &their_hello.capabilities,
        ) {
            Some(shared) => shared,
            None => {
                // no capability in common: tell the peer and bail
                let mut disconnect = BytesMut::new();
                P2PMessage::Disconnect(DisconnectReason::UselessPeer).encode(&mut disconnect);
                let _ = self.inner.send(disconnect.freeze()).await;
                return Err(P2PStreamError::HandshakeError(
                    P2PHandshakeError::NoSharedCapability,
                ))
            }
        };

        let stream = P2PStream::new(self.inner, shared_capability);
        Ok((stream, their_hello))
    }
}

/// A `P2PStream` carries the sub-protocol messages of the negotiated shared
/// capability and handles the base protocol internally: it answers pings,
/// surfaces disconnects and keeps the connection alive.
#[pin_project]
#[derive(Debug)]
pub struct P2PStream<S> {
    #[pin]
    inner: S,
    shared_capability: SharedCapability,
    ping_interval: tokio::time::Interval,
    awaiting_pong: bool,
    /// A pong that still has to be written out because the sink was busy.
    queued_pong: Option<Bytes>,
    disconnecting: bool,
}

impl<S> P2PStream<S> {
    /// Create a new [`P2PStream`] from an already authenticated stream.
    pub fn new(inner: S, shared_capability: SharedCapability) -> Self {
        Self {
            inner,
            shared_capability,
            ping_interval: tokio::time::interval(PING_INTERVAL),
            awaiting_pong: false,
            queued_pong: None,
            disconnecting: false,
        }
    }

    /// The capability negotiated during the handshake.
    pub fn shared_capability(&self) -> SharedCapability {
        self.shared_capability
    }
}

impl<S> P2PStream<S>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    /// Sends a disconnect message to the peer and marks the stream as
    /// closing.
    pub async fn disconnect(&mut self, reason: DisconnectReason) -> Result<(), P2PStreamError> {
        self.disconnecting = true;
        let mut buf = BytesMut::new();
        P2PMessage::Disconnect(reason).encode(&mut buf);
        self.inner.send(buf.freeze()).await?;
        Ok(())
    }
}

impl<S> Stream for P2PStream<S>
where
    S: Stream<Item = std::io::Result<BytesMut>> + Sink<Bytes, Error = std::io::Error> + Unpin,
{
    type Item = Result<BytesMut, P2PStreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.disconnecting {
            return Poll::Ready(None)
        }

        // flush a pong left over from a previous poll before reading more
        if let Some(pong) = this.queued_pong.take() {
            match this.inner.as_mut().poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    if let Err(err) = this.inner.as_mut().start_send(pong) {
                        return Poll::Ready(Some(Err(err.into())))
                    }
                    let _ = this.inner.as_mut().poll_flush(cx);
                }
                Poll::Ready(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                Poll::Pending => *this.queued_pong = Some(pong),
            }
        }

        // keepalive: a tick both sends a new ping and is the deadline for
        // the previous one
        if this.ping_interval.poll_tick(cx).is_ready() {
            if *this.awaiting_pong {
                return Poll::Ready(Some(Err(P2PStreamError::PingTimeout)))
            }
            let mut ping = BytesMut::new();
            P2PMessage::Ping.encode(&mut ping);
            if let Poll::Ready(Ok(())) = this.inner.as_mut().poll_ready(cx) {
                if let Err(err) = this.inner.as_mut().start_send(ping.freeze()) {
                    return Poll::Ready(Some(Err(err.into())))
                }
                let _ = this.inner.as_mut().poll_flush(cx);
                *this.awaiting_pong = true;
            }
        }

        loop {
            let bytes = match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => bytes,
                Some(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                None => return Poll::Ready(None),
            };

            if bytes.is_empty() {
                return Poll::Ready(Some(Err(P2PStreamError::EmptyProtocolMessage)))
            }
            if bytes.len() > MAX_PAYLOAD_SIZE {
                return Poll::Ready(Some(Err(P2PStreamError::MessageTooBig {
                    message_size: bytes.len(),
                    max_size: MAX_PAYLOAD_SIZE,
                })))
            }

            // the first byte is the RLP-encoded message id
            let message_id = if bytes[0] == alloy_rlp::EMPTY_STRING_CODE { 0 } else { bytes[0] };
            if message_id > MAX_RESERVED_MESSAGE_ID {
                // a sub-protocol message, handled above us
                return Poll::Ready(Some(Ok(bytes)))
            }

            let message_id = match P2PMessageID::try_from(message_id) {
                Ok(id) => id,
                Err(id) => {
                    return Poll::Ready(Some(Err(P2PStreamError::UnknownReservedMessageId(id))))
                }
            };
            match message_id {
                P2PMessageID::Ping => {
                    trace!("received ping");
                    let mut pong = BytesMut::new();
                    P2PMessage::Pong.encode(&mut pong);
                    let pong = pong.freeze();
                    match this.inner.as_mut().poll_ready(cx) {
                        Poll::Ready(Ok(())) => {
                            if let Err(err) = this.inner.as_mut().start_send(pong) {
                                return Poll::Ready(Some(Err(err.into())))
                            }
                            let _ = this.inner.as_mut().poll_flush(cx);
                        }
                        Poll::Ready(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                        Poll::Pending => *this.queued_pong = Some(pong),
                    }
                }
                P2PMessageID::Pong => {
                    trace!("received pong");
                    *this.awaiting_pong = false;
                }
                P2PMessageID::Disconnect => {
                    let reason = match DisconnectReason::decode(&mut &bytes[1..]) {
                        Ok(reason) => reason,
                        Err(err) => return Poll::Ready(Some(Err(err.into()))),
                    };
                    debug!(%reason, "peer disconnected");
                    return Poll::Ready(Some(Err(P2PStreamError::Disconnected(reason))))
                }
                P2PMessageID::Hello => {
                    // a Hello after the handshake is a protocol violation
                    return Poll::Ready(Some(Err(P2PStreamError::HandshakeError(
                        P2PHandshakeError::HelloNotInHandshake,
                    ))))
                }
            }
        }
    }
}

impl<S> Sink<Bytes> for P2PStream<S>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    type Error = P2PStreamError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx).map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        let this = self.project();
        if *this.disconnecting {
            return Err(P2PStreamError::AlreadyDisconnecting)
        }
        if item.len() > MAX_PAYLOAD_SIZE {
            return Err(P2PStreamError::MessageTooBig {
                message_size: item.len(),
                max_size: MAX_PAYLOAD_SIZE,
            })
        }
        this.inner.start_send(item).map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Capability;
    use lantern_ecies::util::pk2id;
    use secp256k1::{SecretKey, SECP256K1};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::codec::Decoder;

    fn test_hello(key: &SecretKey, capabilities: Vec<Capability>) -> HelloMessage {
        HelloMessage::builder(pk2id(&key.public_key(SECP256K1)))
            .capabilities(capabilities)
            .build()
    }

    #[tokio::test]
    async fn can_negotiate_capability_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (incoming, _) = listener.accept().await.unwrap();
            let stream = crate::PassthroughCodec::default().framed(incoming);
            let server_key = SecretKey::new(&mut rand::thread_rng());
            let (p2p, _their_hello) = UnauthedP2PStream::new(stream)
                .handshake(test_hello(&server_key, vec![Capability::les(2)]))
                .await
                .unwrap();
            assert_eq!(p2p.shared_capability().offset, 0x10);
        });

        let outgoing = TcpStream::connect(local_addr).await.unwrap();
        let sink = crate::PassthroughCodec::default().framed(outgoing);
        let client_key = SecretKey::new(&mut rand::thread_rng());

        let (p2p, _their_hello) = UnauthedP2PStream::new(sink)
            .handshake(test_hello(&client_key, vec![Capability::les(2), Capability::pip(1)]))
            .await
            .unwrap();
        assert_eq!(p2p.shared_capability().version, 2);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_peer_without_shared_capability() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (incoming, _) = listener.accept().await.unwrap();
            let stream = crate::PassthroughCodec::default().framed(incoming);
            let server_key = SecretKey::new(&mut rand::thread_rng());
            let result = UnauthedP2PStream::new(stream)
                .handshake(test_hello(
                    &server_key,
                    vec![Capability::new("eth".to_string(), 68)],
                ))
                .await;
            assert!(matches!(
                result,
                Err(P2PStreamError::HandshakeError(P2PHandshakeError::NoSharedCapability))
            ));
        });

        let outgoing = TcpStream::connect(local_addr).await.unwrap();
        let sink = crate::PassthroughCodec::default().framed(outgoing);
        let client_key = SecretKey::new(&mut rand::thread_rng());

        let result = UnauthedP2PStream::new(sink)
            .handshake(test_hello(&client_key, vec![Capability::les(2)]))
            .await;
        assert!(result.is_err());

        handle.await.unwrap();
    }

    #[test]
    fn ping_pong_round_trip() {
        for msg in [P2PMessage::Ping, P2PMessage::Pong] {
            let mut encoded = Vec::new();
            msg.encode(&mut encoded);
            assert_eq!(encoded.len(), msg.length());
            assert_eq!(P2PMessage::decode(&mut encoded.as_slice()).unwrap(), msg);
        }
    }
}
