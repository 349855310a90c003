//! Discovery packet formats and the signed packet envelope.

use crate::{DiscError, MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use alloy_primitives::{keccak256, B256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use bytes::{Bytes, BytesMut};
use lantern_primitives::{NodeRecord, PeerId};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, SecretKey, SECP256K1,
};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// The address and ports a discovery message refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// IP address of the peer.
    pub address: IpAddr,
    /// Discovery (UDP) port.
    pub udp_port: u16,
    /// Protocol (TCP) port.
    pub tcp_port: u16,
}

impl Endpoint {
    /// Builds the endpoint advertised for a local socket address.
    pub fn from_udp_addr(addr: SocketAddr, tcp_port: u16) -> Self {
        Self { address: addr.ip(), udp_port: addr.port(), tcp_port }
    }
}

impl From<NodeRecord> for Endpoint {
    fn from(NodeRecord { address, tcp_port, udp_port, .. }: NodeRecord) -> Self {
        Self { address, tcp_port, udp_port }
    }
}

impl Decodable for Endpoint {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let Point { octets, udp_port, tcp_port } = Point::decode(buf)?;
        Ok(Self { address: octets.into(), udp_port, tcp_port })
    }
}

impl Encodable for Endpoint {
    fn encode(&self, out: &mut dyn bytes::BufMut) {
        let p = Point { octets: self.address.into(), udp_port: self.udp_port, tcp_port: self.tcp_port };
        p.encode(out)
    }

    fn length(&self) -> usize {
        let p = Point { octets: self.address.into(), udp_port: self.udp_port, tcp_port: self.tcp_port };
        p.length()
    }
}

#[derive(RlpDecodable, RlpEncodable)]
struct Point {
    octets: Octets,
    udp_port: u16,
    tcp_port: u16,
}

/// IpAddr octets
enum Octets {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl From<IpAddr> for Octets {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(addr) => Octets::V4(addr.octets()),
            IpAddr::V6(addr) => Octets::V6(addr.octets()),
        }
    }
}

impl From<Octets> for IpAddr {
    fn from(value: Octets) -> Self {
        match value {
            Octets::V4(o) => IpAddr::from(o),
            Octets::V6(o) => {
                let ipv6 = Ipv6Addr::from(o);
                // If the ipv6 is ipv4 compatible/mapped, simply return the ipv4.
                if let Some(ipv4) = ipv6.to_ipv4() {
                    IpAddr::V4(ipv4)
                } else {
                    IpAddr::V6(ipv6)
                }
            }
        }
    }
}

impl Encodable for Octets {
    fn encode(&self, out: &mut dyn bytes::BufMut) {
        let octets = match self {
            Octets::V4(ref o) => &o[..],
            Octets::V6(ref o) => &o[..],
        };
        octets.encode(out)
    }

    fn length(&self) -> usize {
        match self {
            Octets::V4(o) => o[..].length(),
            Octets::V6(o) => o[..].length(),
        }
    }
}

impl Decodable for Octets {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        use bytes::Buf;
        let h = alloy_rlp::Header::decode(buf)?;
        if h.list {
            return Err(alloy_rlp::Error::UnexpectedList)
        }
        let o = match h.payload_length {
            4 => {
                let mut to = [0_u8; 4];
                to.copy_from_slice(&buf[..4]);
                Octets::V4(to)
            }
            16 => {
                let mut to = [0u8; 16];
                to.copy_from_slice(&buf[..16]);
                Octets::V6(to)
            }
            _ => return Err(alloy_rlp::Error::UnexpectedLength),
        };
        buf.advance(h.payload_length);
        Ok(o)
    }
}

/// A ping, the liveness probe both sides of the UDP route must answer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PingMessage {
    /// The sender's endpoint.
    pub from: Endpoint,
    /// The recipient's endpoint.
    pub to: Endpoint,
    /// Unix timestamp after which the packet is stale.
    pub expire: u64,
}

impl Encodable for PingMessage {
    fn encode(&self, out: &mut dyn bytes::BufMut) {
        #[derive(RlpEncodable)]
        struct V4PingMessage<'a> {
            version: u32,
            from: &'a Endpoint,
            to: &'a Endpoint,
            expire: u64,
        }
        V4PingMessage {
            version: 4, // version 4
            from: &self.from,
            to: &self.to,
            expire: self.expire,
        }
        .encode(out)
    }

    fn length(&self) -> usize {
        #[derive(RlpEncodable)]
        struct V4PingMessage<'a> {
            version: u32,
            from: &'a Endpoint,
            to: &'a Endpoint,
            expire: u64,
        }
        V4PingMessage { version: 4, from: &self.from, to: &self.to, expire: self.expire }.length()
    }
}

impl Decodable for PingMessage {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        #[derive(RlpDecodable)]
        struct V4PingMessage {
            _version: u32,
            from: Endpoint,
            to: Endpoint,
            expire: u64,
        }

        let ping = V4PingMessage::decode(buf)?;
        Ok(PingMessage { from: ping.from, to: ping.to, expire: ping.expire })
    }
}

/// The answer to a ping, echoing the ping packet's hash.
#[derive(Clone, Copy, Debug, Eq, PartialEq, RlpEncodable, RlpDecodable)]
pub struct PongMessage {
    /// The endpoint the pong is addressed to.
    pub to: Endpoint,
    /// Hash of the ping packet being answered.
    pub echo: B256,
    /// Unix timestamp after which the packet is stale.
    pub expire: u64,
}

/// Asks a peer for the nodes it knows closest to `target`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, RlpEncodable, RlpDecodable)]
pub struct FindNodeMessage {
    /// The identity to search around.
    pub target: PeerId,
    /// Unix timestamp after which the packet is stale.
    pub expire: u64,
}

/// The nodes a peer answered a [`FindNodeMessage`] with.
#[derive(Clone, Debug, Eq, PartialEq, RlpEncodable, RlpDecodable)]
pub struct NeighboursMessage {
    /// Discovered peer records.
    pub nodes: Vec<NodeRecord>,
    /// Unix timestamp after which the packet is stale.
    pub expire: u64,
}

/// All discovery messages, tagged with their packet type byte.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiscMessage {
    /// A ping packet (0x01).
    Ping(PingMessage),
    /// A pong packet (0x02).
    Pong(PongMessage),
    /// A find-node packet (0x03).
    FindNode(FindNodeMessage),
    /// A neighbours packet (0x04).
    Neighbours(NeighboursMessage),
}

impl DiscMessage {
    /// The packet type byte of this message.
    pub fn packet_type(&self) -> u8 {
        match self {
            Self::Ping(_) => 0x01,
            Self::Pong(_) => 0x02,
            Self::FindNode(_) => 0x03,
            Self::Neighbours(_) => 0x04,
        }
    }
}

/// A decoded, authenticity-checked discovery packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    /// The carried message.
    pub message: DiscMessage,
    /// The identity recovered from the packet signature.
    pub node_id: PeerId,
    /// The packet hash, echoed in pongs.
    pub hash: B256,
}

impl DiscMessage {
    /// Encodes and signs the message into a complete packet:
    ///
    /// packet-header = hash || signature || packet-type
    /// hash = keccak256(signature || packet-type || packet-data)
    /// signature = sign(packet-type || packet-data)
    pub fn encode_packet(&self, secret_key: &SecretKey) -> Bytes {
        let mut data = BytesMut::new();
        data.extend_from_slice(&[self.packet_type()]);
        match self {
            Self::Ping(message) => message.encode(&mut data),
            Self::Pong(message) => message.encode(&mut data),
            Self::FindNode(message) => message.encode(&mut data),
            Self::Neighbours(message) => message.encode(&mut data),
        }

        let signed_hash = keccak256(&data);
        let (rec_id, sig) = SECP256K1
            .sign_ecdsa_recoverable(
                &Message::from_digest_slice(signed_hash.as_slice()).expect("32 bytes"),
                secret_key,
            )
            .serialize_compact();

        let mut packet = BytesMut::with_capacity(32 + 65 + data.len());
        packet.extend_from_slice(&[0u8; 32]); // reserved for the packet hash
        packet.extend_from_slice(&sig);
        packet.extend_from_slice(&[rec_id.to_i32() as u8]);
        packet.extend_from_slice(&data);

        let hash = keccak256(&packet[32..]);
        packet[..32].copy_from_slice(hash.as_slice());
        packet.freeze()
    }

    /// Validates and decodes a raw datagram into a [`Packet`], recovering
    /// the sender's identity from the signature.
    pub fn decode_packet(raw: &[u8]) -> Result<Packet, DiscError> {
        if raw.len() > MAX_PACKET_SIZE {
            return Err(DiscError::Oversize(raw.len()))
        }
        if raw.len() < MIN_PACKET_SIZE {
            return Err(DiscError::InvalidFormat)
        }

        let header_hash = keccak256(&raw[32..]);
        let data_hash = B256::from_slice(&raw[..32]);
        if data_hash != header_hash {
            return Err(DiscError::HashMismatch)
        }

        let signature = &raw[32..96];
        let rec_id = RecoveryId::from_i32(raw[96] as i32)?;
        let signature = RecoverableSignature::from_compact(signature, rec_id)?;

        let signed_hash = keccak256(&raw[97..]);
        let public_key = SECP256K1
            .recover_ecdsa(&Message::from_digest_slice(signed_hash.as_slice())?, &signature)?;
        let node_id = PeerId::from_slice(&public_key.serialize_uncompressed()[1..]);

        let packet_type = raw[97];
        let mut body = &raw[98..];
        let message = match packet_type {
            0x01 => DiscMessage::Ping(PingMessage::decode(&mut body)?),
            0x02 => DiscMessage::Pong(PongMessage::decode(&mut body)?),
            0x03 => DiscMessage::FindNode(FindNodeMessage::decode(&mut body)?),
            0x04 => DiscMessage::Neighbours(NeighboursMessage::decode(&mut body)?),
            unknown => return Err(DiscError::UnknownPacketType(unknown)),
        };

        Ok(Packet { message, node_id, hash: data_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{thread_rng, Rng, RngCore};

    fn rng_endpoint(rng: &mut impl Rng) -> Endpoint {
        let address = if rng.gen() {
            let mut ip = [0u8; 4];
            rng.fill_bytes(&mut ip);
            IpAddr::V4(ip.into())
        } else {
            let mut ip = [0u8; 16];
            rng.fill_bytes(&mut ip);
            IpAddr::V6(ip.into())
        };
        Endpoint { address, tcp_port: rng.gen(), udp_port: rng.gen() }
    }

    #[test]
    fn test_endpoint_ipv_v4() {
        let mut rng = thread_rng();
        for _ in 0..100 {
            let mut ip = [0u8; 4];
            rng.fill_bytes(&mut ip);
            let msg = Endpoint {
                address: IpAddr::V4(ip.into()),
                tcp_port: rng.gen(),
                udp_port: rng.gen(),
            };

            let mut buf = BytesMut::new();
            msg.encode(&mut buf);

            let decoded = Endpoint::decode(&mut buf.as_ref()).unwrap();
            assert_eq!(msg, decoded);
        }
    }

    #[test]
    fn ping_packet_signs_and_recovers() {
        let mut rng = thread_rng();
        let secret_key = SecretKey::new(&mut rng);
        let public_key = secret_key.public_key(SECP256K1);
        let expected_id = PeerId::from_slice(&public_key.serialize_uncompressed()[1..]);

        let ping = DiscMessage::Ping(PingMessage {
            from: rng_endpoint(&mut rng),
            to: rng_endpoint(&mut rng),
            expire: 1_754_000_000,
        });

        let raw = ping.encode_packet(&secret_key);
        let packet = DiscMessage::decode_packet(&raw).unwrap();
        assert_eq!(packet.node_id, expected_id);
        assert_eq!(packet.message, ping);
    }

    #[test]
    fn pong_echo_matches_ping_hash() {
        let mut rng = thread_rng();
        let secret_key = SecretKey::new(&mut rng);

        let ping = DiscMessage::Ping(PingMessage {
            from: rng_endpoint(&mut rng),
            to: rng_endpoint(&mut rng),
            expire: 0,
        });
        let raw = ping.encode_packet(&secret_key);
        let packet = DiscMessage::decode_packet(&raw).unwrap();

        let pong = DiscMessage::Pong(PongMessage {
            to: rng_endpoint(&mut rng),
            echo: packet.hash,
            expire: 0,
        });
        let raw = pong.encode_packet(&secret_key);
        let decoded = DiscMessage::decode_packet(&raw).unwrap();
        match decoded.message {
            DiscMessage::Pong(pong) => assert_eq!(pong.echo, packet.hash),
            other => panic!("expected pong, got {other:?}"),
        }
    }

    #[test]
    fn tampered_packet_is_rejected() {
        let mut rng = thread_rng();
        let secret_key = SecretKey::new(&mut rng);
        let ping = DiscMessage::Ping(PingMessage {
            from: rng_endpoint(&mut rng),
            to: rng_endpoint(&mut rng),
            expire: 0,
        });
        let raw = ping.encode_packet(&secret_key);

        let mut tampered = raw.to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;
        assert!(matches!(DiscMessage::decode_packet(&tampered), Err(DiscError::HashMismatch)));
    }

    #[test]
    fn oversize_packet_is_rejected() {
        let raw = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(DiscMessage::decode_packet(&raw), Err(DiscError::Oversize(_))));
    }

    #[test]
    fn neighbours_round_trip() {
        let mut rng = thread_rng();
        let secret_key = SecretKey::new(&mut rng);
        let mut id = [0u8; 64];
        rng.fill_bytes(&mut id);
        let nodes = vec![NodeRecord {
            address: IpAddr::V4([10, 3, 58, 6].into()),
            udp_port: 30301,
            tcp_port: 30303,
            id: PeerId::from_slice(&id),
        }];
        let neighbours =
            DiscMessage::Neighbours(NeighboursMessage { nodes: nodes.clone(), expire: 0 });
        let raw = neighbours.encode_packet(&secret_key);
        let packet = DiscMessage::decode_packet(&raw).unwrap();
        match packet.message {
            DiscMessage::Neighbours(msg) => assert_eq!(msg.nodes, nodes),
            other => panic!("expected neighbours, got {other:?}"),
        }
    }
}
