//! Wire-format network addresses.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use super::{Error, Result};

/// A node address as carried in `version` and `addr` messages: 16-byte IPv6
/// (IPv4 addresses are mapped as `::ffff:a.b.c.d`), a port, and a service bitfield.
#[derive(Debug, Clone, Copy, Eq)]
pub struct NetworkAddress {
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

/// Identity is the (ip, port) pair; `services` is metadata, not identity.
impl PartialEq for NetworkAddress {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl std::hash::Hash for NetworkAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

const WIRE_LEN: usize = 26;

impl NetworkAddress {
    pub fn new(addr: SocketAddr, services: u64) -> Self {
        Self {
            services,
            ip: to_mapped_bytes(addr.ip()),
            port: addr.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(from_mapped_bytes(self.ip), self.port)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.ip);
        out.extend_from_slice(&self.port.to_be_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < WIRE_LEN {
            return Err(Error::Truncated {
                need: WIRE_LEN,
                have: buf.len(),
            });
        }
        let services = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let mut ip = [0u8; 16];
        ip.copy_from_slice(&buf[8..24]);
        let port = u16::from_be_bytes(buf[24..26].try_into().unwrap());
        Ok((Self { services, ip, port }, WIRE_LEN))
    }
}

fn to_mapped_bytes(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn from_mapped_bytes(bytes: [u8; 16]) -> IpAddr {
    let v6 = Ipv6Addr::from(bytes);
    if let Some(v4) = v6.to_ipv4_mapped() {
        IpAddr::V4(v4)
    } else {
        IpAddr::V6(v6)
    }
}

/// An address annotated with the unix timestamp it was last seen active, as
/// carried in `addr` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampedAddress {
    pub timestamp: u32,
    pub address: NetworkAddress,
}

impl TimestampedAddress {
    pub fn new(timestamp: u32, address: NetworkAddress) -> Self {
        Self { timestamp, address }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        self.address.encode(out);
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(Error::Truncated { need: 4, have: buf.len() });
        }
        let timestamp = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let (address, used) = NetworkAddress::decode(&buf[4..])?;
        Ok((Self { timestamp, address }, 4 + used))
    }
}

/// Dummy unroutable address used as `addr_recv`/`addr_from` filler when the
/// peer's real address as seen locally is unknown.
pub fn unroutable() -> NetworkAddress {
    NetworkAddress::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_v4() {
        let a = NetworkAddress::new("1.2.3.4:9590".parse().unwrap(), 1);
        let mut buf = Vec::new();
        a.encode(&mut buf);
        let (decoded, used) = NetworkAddress::decode(&buf).unwrap();
        assert_eq!(used, WIRE_LEN);
        assert_eq!(decoded, a);
        assert_eq!(decoded.socket_addr(), "1.2.3.4:9590".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn identity_ignores_services() {
        let a = NetworkAddress::new("1.2.3.4:9590".parse().unwrap(), 0);
        let b = NetworkAddress::new("1.2.3.4:9590".parse().unwrap(), 7);
        assert_eq!(a, b);
    }

    #[test]
    fn timestamped_round_trips() {
        let ts = TimestampedAddress::new(12345, NetworkAddress::new("5.6.7.8:1234".parse().unwrap(), 1));
        let mut buf = Vec::new();
        ts.encode(&mut buf);
        let (decoded, _) = TimestampedAddress::decode(&buf).unwrap();
        assert_eq!(decoded, ts);
    }
}
