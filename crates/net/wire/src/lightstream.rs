//! The light sub-protocol stream: encodes and decodes [`LightMessage`]s per
//! the negotiated wire family, after a Status handshake.

use crate::{
    capability::{LightProtocol, SharedCapability},
    errors::{LightHandshakeError, LightStreamError},
    les,
    message::LightMessage,
    pip,
    status::LightStatus,
};
use bytes::{Bytes, BytesMut};
use futures::{ready, Sink, SinkExt, StreamExt};
use pin_project::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio_stream::Stream;
use tracing::trace;

/// An un-authenticated [`LightStream`], consumed by
/// [`UnauthedLightStream::handshake`] once the Status exchange completes.
#[pin_project]
#[derive(Debug)]
pub struct UnauthedLightStream<S> {
    #[pin]
    inner: S,
    shared: SharedCapability,
}

impl<S> UnauthedLightStream<S> {
    /// Create a new `UnauthedLightStream` on top of a `p2p` stream that
    /// negotiated `shared`.
    pub fn new(inner: S, shared: SharedCapability) -> Self {
        Self { inner, shared }
    }
}

impl<S, E> UnauthedLightStream<S>
where
    S: Stream<Item = Result<BytesMut, E>> + Sink<Bytes, Error = E> + Unpin,
    LightStreamError: From<E>,
{
    /// Exchanges Status messages and validates that the peer serves the same
    /// chain. Returns the authenticated stream and the peer's status.
    pub async fn handshake(
        mut self,
        status: LightStatus,
    ) -> Result<(LightStream<S>, LightStatus), LightStreamError> {
        trace!(%status, "sending light status ...");
        let mut our_status_bytes = BytesMut::new();
        encode_message(self.shared, &LightMessage::Status(status.clone()), &mut our_status_bytes);
        self.inner.send(our_status_bytes.freeze()).await?;

        trace!("waiting for light status from peer ...");
        let their_msg_bytes = self
            .inner
            .next()
            .await
            .ok_or(LightStreamError::HandshakeError(LightHandshakeError::NoResponse))??;

        let their_msg = decode_message(self.shared, &mut their_msg_bytes.as_ref())?;
        match their_msg {
            LightMessage::Status(resp) => {
                if status.genesis_hash != resp.genesis_hash {
                    return Err(LightHandshakeError::MismatchedGenesis {
                        expected: status.genesis_hash,
                        got: resp.genesis_hash,
                    }
                    .into())
                }
                if status.network_id != resp.network_id {
                    return Err(LightHandshakeError::MismatchedNetwork {
                        expected: status.network_id,
                        got: resp.network_id,
                    }
                    .into())
                }

                let stream = LightStream { inner: self.inner, shared: self.shared };
                Ok((stream, resp))
            }
            _ => Err(LightStreamError::HandshakeError(
                LightHandshakeError::NonStatusMessageInHandshake,
            )),
        }
    }
}

/// Encodes a [`LightMessage`] for the wire family of `shared`.
pub fn encode_message(shared: SharedCapability, message: &LightMessage, out: &mut BytesMut) {
    match shared.protocol {
        LightProtocol::Les => les::encode(message, shared.offset, out),
        LightProtocol::Pip => pip::encode(message, shared.offset, out),
    }
}

/// Decodes a [`LightMessage`] for the wire family of `shared`.
pub fn decode_message(
    shared: SharedCapability,
    buf: &mut &[u8],
) -> Result<LightMessage, LightStreamError> {
    match shared.protocol {
        LightProtocol::Les => les::decode(shared.offset, buf),
        LightProtocol::Pip => pip::decode(shared.offset, buf),
    }
}

/// A `LightStream` is a stream and sink of [`LightMessage`]s over an
/// authenticated `p2p` connection.
#[pin_project]
#[derive(Debug)]
pub struct LightStream<S> {
    #[pin]
    inner: S,
    shared: SharedCapability,
}

impl<S> LightStream<S> {
    /// Creates a new stream without performing the Status handshake, for the
    /// server half of in-process tests.
    pub fn new(inner: S, shared: SharedCapability) -> Self {
        Self { inner, shared }
    }

    /// The negotiated capability.
    pub fn shared_capability(&self) -> SharedCapability {
        self.shared
    }

    /// Returns the underlying stream.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns mutable access to the underlying stream.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S, E> Stream for LightStream<S>
where
    S: Stream<Item = Result<BytesMut, E>> + Unpin,
    LightStreamError: From<E>,
{
    type Item = Result<LightMessage, LightStreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let res = ready!(this.inner.poll_next(cx));
        let bytes = match res {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
            None => return Poll::Ready(None),
        };

        let msg = match decode_message(*this.shared, &mut bytes.as_ref()) {
            Ok(msg) => msg,
            Err(err) => return Poll::Ready(Some(Err(err))),
        };

        if matches!(msg, LightMessage::Status(_)) {
            return Poll::Ready(Some(Err(LightStreamError::HandshakeError(
                LightHandshakeError::StatusNotInHandshake,
            ))))
        }

        Poll::Ready(Some(Ok(msg)))
    }
}

impl<S, E> Sink<LightMessage> for LightStream<S>
where
    S: Sink<Bytes, Error = E> + Unpin,
    LightStreamError: From<E>,
{
    type Error = LightStreamError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx).map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: LightMessage) -> Result<(), Self::Error> {
        if matches!(item, LightMessage::Status(_)) {
            return Err(LightStreamError::HandshakeError(
                LightHandshakeError::StatusNotInHandshake,
            ))
        }

        let this = self.project();
        let mut bytes = BytesMut::new();
        encode_message(*this.shared, &item, &mut bytes);
        this.inner.start_send(bytes.freeze())?;
        Ok(())
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
    use crate::{
        message::{Announce, GetBlockHeaders, RequestPair},
        Capability, HelloMessage, UnauthedP2PStream,
    };
    use alloy_primitives::{B256, U256};
    use lantern_ecies::{stream::ECIESStream, util::pk2id};
    use secp256k1::{SecretKey, SECP256K1};
    use tokio::net::{TcpListener, TcpStream};

    fn test_status(genesis: B256) -> LightStatus {
        LightStatus::builder()
            .network(1)
            .head(B256::repeat_byte(0xaa), 4_732_522, U256::from(1_000u64))
            .genesis(genesis)
            .build()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lightstream_over_p2p_over_ecies() {
        let genesis = B256::random();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let server_key = SecretKey::new(&mut rand::thread_rng());

        let test_msg = LightMessage::Announce(Announce {
            head_hash: B256::repeat_byte(0x0b),
            head_number: 4_732_523,
            head_td: U256::from(5u64),
            reorg_depth: 0,
        });

        let test_msg_clone = test_msg.clone();
        let handle = tokio::spawn(async move {
            let (incoming, _) = listener.accept().await.unwrap();
            let stream = ECIESStream::incoming(incoming, server_key).await.unwrap();

            let server_hello = HelloMessage::builder(pk2id(&server_key.public_key(SECP256K1)))
                .capabilities(vec![Capability::les(2)])
                .build();
            let (p2p_stream, _) =
                UnauthedP2PStream::new(stream).handshake(server_hello).await.unwrap();
            let shared = p2p_stream.shared_capability();

            let (mut light_stream, _) = UnauthedLightStream::new(p2p_stream, shared)
                .handshake(test_status(genesis))
                .await
                .unwrap();

            let message = light_stream.next().await.unwrap().unwrap();
            assert_eq!(message, test_msg_clone);
        });

        let server_key_pub = pk2id(&server_key.public_key(SECP256K1));
        let client_key = SecretKey::new(&mut rand::thread_rng());

        let outgoing = TcpStream::connect(local_addr).await.unwrap();
        let sink = ECIESStream::connect(outgoing, client_key, server_key_pub).await.unwrap();

        let client_hello = HelloMessage::builder(pk2id(&client_key.public_key(SECP256K1)))
            .capabilities(vec![Capability::les(2)])
            .build();
        let (p2p_stream, _) = UnauthedP2PStream::new(sink).handshake(client_hello).await.unwrap();
        let shared = p2p_stream.shared_capability();

        let (mut client_stream, _) = UnauthedLightStream::new(p2p_stream, shared)
            .handshake(test_status(genesis))
            .await
            .unwrap();

        client_stream.send(test_msg).await.unwrap();

        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mismatched_genesis_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let server_key = SecretKey::new(&mut rand::thread_rng());

        let handle = tokio::spawn(async move {
            let (incoming, _) = listener.accept().await.unwrap();
            let stream = ECIESStream::incoming(incoming, server_key).await.unwrap();
            let server_hello = HelloMessage::builder(pk2id(&server_key.public_key(SECP256K1)))
                .capabilities(vec![Capability::les(2)])
                .build();
            let (p2p_stream, _) =
                UnauthedP2PStream::new(stream).handshake(server_hello).await.unwrap();
            let shared = p2p_stream.shared_capability();
            let result = UnauthedLightStream::new(p2p_stream, shared)
                .handshake(test_status(B256::repeat_byte(0x01)))
                .await;
            assert!(result.is_err());
        });

        let server_id = pk2id(&server_key.public_key(SECP256K1));
        let client_key = SecretKey::new(&mut rand::thread_rng());
        let outgoing = TcpStream::connect(local_addr).await.unwrap();
        let sink = ECIESStream::connect(outgoing, client_key, server_id).await.unwrap();
        let client_hello = HelloMessage::builder(pk2id(&client_key.public_key(SECP256K1)))
            .capabilities(vec![Capability::les(2)])
            .build();
        let (p2p_stream, _) = UnauthedP2PStream::new(sink).handshake(client_hello).await.unwrap();
        let shared = p2p_stream.shared_capability();

        let result = UnauthedLightStream::new(p2p_stream, shared)
            .handshake(test_status(B256::repeat_byte(0x02)))
            .await;
        assert!(matches!(
            result,
            Err(LightStreamError::HandshakeError(LightHandshakeError::MismatchedGenesis { .. }))
        ));

        handle.await.unwrap();
    }

    #[test]
    fn request_round_trips_in_both_families() {
        let message = LightMessage::GetBlockHeaders(RequestPair {
            request_id: 11,
            message: GetBlockHeaders {
                origin: 4_732_522u64.into(),
                max: 3,
                skip: 0,
                reverse: false,
            },
        });
        for protocol in [LightProtocol::Les, LightProtocol::Pip] {
            let shared = SharedCapability { protocol, version: 2, offset: 0x10 };
            let mut buf = BytesMut::new();
            encode_message(shared, &message, &mut buf);
            let decoded = decode_message(shared, &mut buf.as_ref()).unwrap();
            assert_eq!(decoded, message);
        }
    }
}
