use crate::PeerId;
use alloy_primitives::hex;
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use bytes::{Buf, BufMut};
use std::{
    fmt,
    fmt::Write,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    num::ParseIntError,
    str::FromStr,
};

/// A peer's advertised identity and endpoints.
///
/// This is the record exchanged in discovery `Neighbours` packets and handed
/// to persistent storage by the embedding application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeRecord {
    /// IP address of the peer.
    pub address: IpAddr,
    /// Discovery (UDP) port.
    pub udp_port: u16,
    /// Protocol (TCP) port.
    pub tcp_port: u16,
    /// Identity public key.
    pub id: PeerId,
}

impl NodeRecord {
    /// Creates a record with the same port for both routes.
    pub fn new(addr: SocketAddr, id: PeerId) -> Self {
        Self { address: addr.ip(), udp_port: addr.port(), tcp_port: addr.port(), id }
    }

    /// The UDP socket address of the peer.
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.udp_port)
    }

    /// The TCP socket address of the peer.
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.tcp_port)
    }

    /// Maps an IPv4-compatible IPv6 address back to plain IPv4.
    pub fn convert_ipv4_mapped(&mut self) -> bool {
        if let IpAddr::V6(v6) = self.address {
            if let Some(v4) = v6.to_ipv4_mapped() {
                self.address = v4.into();
                return true
            }
        }
        false
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("enode://")?;
        let mut hexed = [0u8; 128];
        hex::encode_to_slice(self.id.as_slice(), &mut hexed).map_err(|_| fmt::Error)?;
        // encode_to_slice output is always valid ascii hex
        f.write_str(std::str::from_utf8(&hexed).map_err(|_| fmt::Error)?)?;
        f.write_char('@')?;
        match self.address {
            IpAddr::V4(addr) => write!(f, "{addr}")?,
            IpAddr::V6(addr) => write!(f, "[{addr}]")?,
        }
        write!(f, ":{}", self.tcp_port)?;
        if self.udp_port != self.tcp_port {
            write!(f, "?discport={}", self.udp_port)?;
        }
        Ok(())
    }
}

/// Failure to parse an `enode://` url into a [`NodeRecord`].
#[derive(Debug, thiserror::Error)]
pub enum NodeRecordParseError {
    /// Not an enode url at all.
    #[error("invalid enode url: {0}")]
    InvalidUrl(String),
    /// Identity part was not 64 hex bytes.
    #[error("invalid node id: {0}")]
    InvalidId(String),
    /// Port part did not parse.
    #[error("invalid port: {0}")]
    InvalidPort(#[from] ParseIntError),
}

impl FromStr for NodeRecord {
    type Err = NodeRecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("enode://")
            .ok_or_else(|| NodeRecordParseError::InvalidUrl(s.to_string()))?;
        let (id_part, addr_part) = rest
            .split_once('@')
            .ok_or_else(|| NodeRecordParseError::InvalidUrl(s.to_string()))?;

        let id_bytes = hex::decode(id_part)
            .map_err(|_| NodeRecordParseError::InvalidId(id_part.to_string()))?;
        if id_bytes.len() != 64 {
            return Err(NodeRecordParseError::InvalidId(id_part.to_string()))
        }
        let id = PeerId::from_slice(&id_bytes);

        let (addr_part, discport) = match addr_part.split_once("?discport=") {
            Some((addr, port)) => (addr, Some(port.parse::<u16>()?)),
            None => (addr_part, None),
        };

        let (host, port) = if let Some(rest) = addr_part.strip_prefix('[') {
            // bracketed ipv6
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| NodeRecordParseError::InvalidUrl(s.to_string()))?;
            (IpAddr::V6(Ipv6Addr::from_str(host).map_err(|_| {
                NodeRecordParseError::InvalidUrl(s.to_string())
            })?), port)
        } else {
            let (host, port) = addr_part
                .rsplit_once(':')
                .ok_or_else(|| NodeRecordParseError::InvalidUrl(s.to_string()))?;
            (IpAddr::V4(Ipv4Addr::from_str(host).map_err(|_| {
                NodeRecordParseError::InvalidUrl(s.to_string())
            })?), port)
        };
        let tcp_port = port.parse::<u16>()?;

        Ok(Self { address: host, tcp_port, udp_port: discport.unwrap_or(tcp_port), id })
    }
}

/// IP octets in the variable-width form discovery packets use.
pub(crate) enum Octets {
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
    fn encode(&self, out: &mut dyn BufMut) {
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

#[derive(RlpEncodable, RlpDecodable)]
struct RawNodeRecord {
    octets: Octets,
    udp_port: u16,
    tcp_port: u16,
    id: PeerId,
}

impl Encodable for NodeRecord {
    fn encode(&self, out: &mut dyn BufMut) {
        RawNodeRecord {
            octets: self.address.into(),
            udp_port: self.udp_port,
            tcp_port: self.tcp_port,
            id: self.id,
        }
        .encode(out)
    }

    fn length(&self) -> usize {
        RawNodeRecord {
            octets: self.address.into(),
            udp_port: self.udp_port,
            tcp_port: self.tcp_port,
            id: self.id,
        }
        .length()
    }
}

impl Decodable for NodeRecord {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let RawNodeRecord { octets, udp_port, tcp_port, id } = RawNodeRecord::decode(buf)?;
        Ok(Self { address: octets.into(), udp_port, tcp_port, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{thread_rng, Rng, RngCore};

    fn rng_record(rng: &mut impl Rng) -> NodeRecord {
        let address = if rng.gen() {
            let mut ip = [0u8; 4];
            rng.fill_bytes(&mut ip);
            IpAddr::V4(ip.into())
        } else {
            let mut ip = [0u8; 16];
            rng.fill_bytes(&mut ip);
            IpAddr::V6(ip.into())
        };
        let mut id = [0u8; 64];
        rng.fill_bytes(&mut id);
        NodeRecord {
            address,
            udp_port: rng.gen(),
            tcp_port: rng.gen(),
            id: PeerId::from_slice(&id),
        }
    }

    #[test]
    fn record_rlp_round_trip() {
        let mut rng = thread_rng();
        for _ in 0..50 {
            let record = rng_record(&mut rng);
            let mut buf = Vec::new();
            record.encode(&mut buf);

            let decoded = NodeRecord::decode(&mut buf.as_slice()).unwrap();
            // v6 addresses that are mapped v4 decode as v4
            let mut expected = record;
            expected.convert_ipv4_mapped();
            assert_eq!(decoded.udp_port, expected.udp_port);
            assert_eq!(decoded.tcp_port, expected.tcp_port);
            assert_eq!(decoded.id, expected.id);
        }
    }

    #[test]
    fn enode_url_round_trip() {
        let url = "enode://6f8a80d14311c39f35f516fa664deaaaa13e85b2f7493f37f6144d86991ec012937307647bd3b9a82abe2974e1407241d54947bbb39763a4cac9f77166ad92a0@10.3.58.6:30303?discport=30301";
        let record: NodeRecord = url.parse().unwrap();
        assert_eq!(record.tcp_port, 30303);
        assert_eq!(record.udp_port, 30301);
        assert_eq!(record.to_string(), url);
    }

    #[test]
    fn enode_url_same_port_omits_discport() {
        let url = "enode://6f8a80d14311c39f35f516fa664deaaaa13e85b2f7493f37f6144d86991ec012937307647bd3b9a82abe2974e1407241d54947bbb39763a4cac9f77166ad92a0@10.3.58.6:30303";
        let record: NodeRecord = url.parse().unwrap();
        assert_eq!(record.udp_port, record.tcp_port);
        assert_eq!(record.to_string(), url);
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!("http://nope".parse::<NodeRecord>().is_err());
        assert!("enode://abcd@1.2.3.4:30303".parse::<NodeRecord>().is_err());
        assert!("enode://".parse::<NodeRecord>().is_err());
    }
}
