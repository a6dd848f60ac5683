//! Payload encoding/decoding for each command in the closed wire protocol.
use super::address::{NetworkAddress, TimestampedAddress};
use super::varint::{read_var_str, read_varint, write_var_str, write_varint};
use super::{
    Error, Result, CMD_ADDR, CMD_GETADDR, CMD_GETDATA, CMD_GETHEADERS, CMD_HEADERS, CMD_INV,
    CMD_NOTFOUND, CMD_PING, CMD_PONG, CMD_SENDHEADERS, CMD_VERACK, CMD_VERSION, MAX_ADDR_SIZE,
    MAX_HEADERS_SIZE, MAX_INV_SIZE, MAX_SUBVERSION_LENGTH,
};

/// An inventory item, as carried in `inv`/`getdata`/`notfound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryVector {
    pub inv_type: u32,
    pub hash: [u8; 32],
}

impl InventoryVector {
    const LEN: usize = 36;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.inv_type.to_le_bytes());
        out.extend_from_slice(&self.hash);
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < Self::LEN {
            return Err(Error::Truncated { need: Self::LEN, have: buf.len() });
        }
        let inv_type = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&buf[4..36]);
        Ok((Self { inv_type, hash }, Self::LEN))
    }
}

/// A minimal, framing-only block header: 80 bytes plus the conventional
/// trailing zero tx-count byte used by `headers` messages on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeaderWire {
    pub version: i32,
    pub prev_blockhash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeaderWire {
    const LEN: usize = 80;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.prev_blockhash);
        out.extend_from_slice(&self.merkle_root);
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        write_varint(out, 0); // tx count, always zero: headers-only wire framing.
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < Self::LEN {
            return Err(Error::Truncated { need: Self::LEN, have: buf.len() });
        }
        let version = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut prev_blockhash = [0u8; 32];
        prev_blockhash.copy_from_slice(&buf[4..36]);
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&buf[36..68]);
        let time = u32::from_le_bytes(buf[68..72].try_into().unwrap());
        let bits = u32::from_le_bytes(buf[72..76].try_into().unwrap());
        let nonce = u32::from_le_bytes(buf[76..80].try_into().unwrap());
        let (tx_count, tx_count_len) = read_varint(&buf[Self::LEN..])?;
        if tx_count != 0 {
            return Err(Error::OversizedCount { got: tx_count as usize, max: 0 });
        }
        Ok((
            Self {
                version,
                prev_blockhash,
                merkle_root,
                time,
                bits,
                nonce,
            },
            Self::LEN + tx_count_len,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: NetworkAddress,
    pub addr_from: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeadersMessage {
    pub version: u32,
    pub locator_hashes: Vec<[u8; 32]>,
    pub hash_stop: [u8; 32],
}

/// The closed set of messages this implementation speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Addr(Vec<TimestampedAddress>),
    GetAddr,
    Inv(Vec<InventoryVector>),
    GetData(Vec<InventoryVector>),
    NotFound(Vec<InventoryVector>),
    GetHeaders(GetHeadersMessage),
    Headers(Vec<BlockHeaderWire>),
    SendHeaders,
    Ping(u64),
    Pong(u64),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => CMD_VERSION,
            Message::Verack => CMD_VERACK,
            Message::Addr(_) => CMD_ADDR,
            Message::GetAddr => CMD_GETADDR,
            Message::Inv(_) => CMD_INV,
            Message::GetData(_) => CMD_GETDATA,
            Message::NotFound(_) => CMD_NOTFOUND,
            Message::GetHeaders(_) => CMD_GETHEADERS,
            Message::Headers(_) => CMD_HEADERS,
            Message::SendHeaders => CMD_SENDHEADERS,
            Message::Ping(_) => CMD_PING,
            Message::Pong(_) => CMD_PONG,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Message::Version(v) => {
                out.extend_from_slice(&v.version.to_le_bytes());
                out.extend_from_slice(&v.services.to_le_bytes());
                out.extend_from_slice(&v.timestamp.to_le_bytes());
                v.addr_recv.encode(&mut out);
                v.addr_from.encode(&mut out);
                out.extend_from_slice(&v.nonce.to_le_bytes());
                write_var_str(&mut out, &v.user_agent);
                out.extend_from_slice(&v.start_height.to_le_bytes());
                out.push(v.relay as u8);
            }
            Message::Verack | Message::GetAddr | Message::SendHeaders => {}
            Message::Addr(addrs) => {
                write_varint(&mut out, addrs.len() as u64);
                for a in addrs {
                    a.encode(&mut out);
                }
            }
            Message::Inv(items) | Message::GetData(items) | Message::NotFound(items) => {
                write_varint(&mut out, items.len() as u64);
                for i in items {
                    i.encode(&mut out);
                }
            }
            Message::GetHeaders(gh) => {
                out.extend_from_slice(&gh.version.to_le_bytes());
                write_varint(&mut out, gh.locator_hashes.len() as u64);
                for h in &gh.locator_hashes {
                    out.extend_from_slice(h);
                }
                out.extend_from_slice(&gh.hash_stop);
            }
            Message::Headers(headers) => {
                write_varint(&mut out, headers.len() as u64);
                for h in headers {
                    h.encode(&mut out);
                }
            }
            Message::Ping(nonce) | Message::Pong(nonce) => {
                out.extend_from_slice(&nonce.to_le_bytes());
            }
        }
        out
    }

    pub fn decode(command: &str, buf: &[u8]) -> Result<Self> {
        match command {
            CMD_VERSION => decode_version(buf).map(Message::Version),
            CMD_VERACK => Ok(Message::Verack),
            CMD_GETADDR => Ok(Message::GetAddr),
            CMD_SENDHEADERS => Ok(Message::SendHeaders),
            CMD_ADDR => decode_addr(buf).map(Message::Addr),
            CMD_INV => decode_inventory(buf, MAX_INV_SIZE).map(Message::Inv),
            CMD_GETDATA => decode_inventory(buf, MAX_INV_SIZE).map(Message::GetData),
            CMD_NOTFOUND => decode_inventory(buf, MAX_INV_SIZE).map(Message::NotFound),
            CMD_GETHEADERS => decode_getheaders(buf).map(Message::GetHeaders),
            CMD_HEADERS => decode_headers(buf).map(Message::Headers),
            CMD_PING => decode_nonce(buf).map(Message::Ping),
            CMD_PONG => decode_nonce(buf).map(Message::Pong),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

fn decode_nonce(buf: &[u8]) -> Result<u64> {
    if buf.len() < 8 {
        return Err(Error::Truncated { need: 8, have: buf.len() });
    }
    Ok(u64::from_le_bytes(buf[0..8].try_into().unwrap()))
}

fn decode_version(buf: &[u8]) -> Result<VersionMessage> {
    if buf.len() < 20 {
        return Err(Error::Truncated { need: 20, have: buf.len() });
    }
    let version = i32::from_le_bytes(buf[0..4].try_into().unwrap());
    let services = u64::from_le_bytes(buf[4..12].try_into().unwrap());
    let timestamp = i64::from_le_bytes(buf[12..20].try_into().unwrap());
    let mut offset = 20;

    let (addr_recv, used) = NetworkAddress::decode(&buf[offset..])?;
    offset += used;
    let (addr_from, used) = NetworkAddress::decode(&buf[offset..])?;
    offset += used;

    if buf.len() < offset + 8 {
        return Err(Error::Truncated { need: offset + 8, have: buf.len() });
    }
    let nonce = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
    offset += 8;

    let (user_agent, used) = read_var_str(&buf[offset..], MAX_SUBVERSION_LENGTH)?;
    offset += used;

    if buf.len() < offset + 5 {
        return Err(Error::Truncated { need: offset + 5, have: buf.len() });
    }
    let start_height = i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
    let relay = buf[offset + 4] != 0;

    Ok(VersionMessage {
        version,
        services,
        timestamp,
        addr_recv,
        addr_from,
        nonce,
        user_agent,
        start_height,
        relay,
    })
}

fn decode_addr(buf: &[u8]) -> Result<Vec<TimestampedAddress>> {
    let (count, mut offset) = read_varint(buf)?;
    if count as usize > MAX_ADDR_SIZE {
        return Err(Error::OversizedCount { got: count as usize, max: MAX_ADDR_SIZE });
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (addr, used) = TimestampedAddress::decode(&buf[offset..])?;
        out.push(addr);
        offset += used;
    }
    Ok(out)
}

fn decode_inventory(buf: &[u8], cap: usize) -> Result<Vec<InventoryVector>> {
    let (count, mut offset) = read_varint(buf)?;
    if count as usize > cap {
        return Err(Error::OversizedCount { got: count as usize, max: cap });
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (item, used) = InventoryVector::decode(&buf[offset..])?;
        out.push(item);
        offset += used;
    }
    Ok(out)
}

fn decode_getheaders(buf: &[u8]) -> Result<GetHeadersMessage> {
    if buf.len() < 4 {
        return Err(Error::Truncated { need: 4, have: buf.len() });
    }
    let version = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let (count, mut offset) = read_varint(&buf[4..])?;
    offset += 4;
    if count as usize > MAX_HEADERS_SIZE {
        return Err(Error::OversizedCount { got: count as usize, max: MAX_HEADERS_SIZE });
    }
    let mut locator_hashes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if buf.len() < offset + 32 {
            return Err(Error::Truncated { need: offset + 32, have: buf.len() });
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&buf[offset..offset + 32]);
        locator_hashes.push(hash);
        offset += 32;
    }
    if buf.len() < offset + 32 {
        return Err(Error::Truncated { need: offset + 32, have: buf.len() });
    }
    let mut hash_stop = [0u8; 32];
    hash_stop.copy_from_slice(&buf[offset..offset + 32]);

    Ok(GetHeadersMessage { version, locator_hashes, hash_stop })
}

fn decode_headers(buf: &[u8]) -> Result<Vec<BlockHeaderWire>> {
    let (count, mut offset) = read_varint(buf)?;
    if count as usize > MAX_HEADERS_SIZE {
        return Err(Error::OversizedCount { got: count as usize, max: MAX_HEADERS_SIZE });
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (header, used) = BlockHeaderWire::decode(&buf[offset..])?;
        out.push(header);
        offset += used;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::address::unroutable;

    fn sample_version() -> VersionMessage {
        VersionMessage {
            version: 70016,
            services: 1,
            timestamp: 1_700_000_000,
            addr_recv: unroutable(),
            addr_from: unroutable(),
            nonce: 0xDEAD_BEEF,
            user_agent: "/test:0.1/".to_string(),
            start_height: 42,
            relay: false,
        }
    }

    #[test]
    fn version_round_trips() {
        let msg = Message::Version(sample_version());
        let encoded = msg.encode();
        let decoded = Message::decode(msg.command(), &encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn ping_pong_round_trip() {
        let msg = Message::Ping(7);
        let decoded = Message::decode(msg.command(), &msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn addr_over_cap_is_rejected() {
        let mut buf = Vec::new();
        write_varint(&mut buf, (MAX_ADDR_SIZE + 1) as u64);
        assert!(matches!(
            Message::decode(CMD_ADDR, &buf),
            Err(Error::OversizedCount { .. })
        ));
    }

    #[test]
    fn inv_round_trips() {
        let items = vec![InventoryVector { inv_type: super::super::MSG_BLOCK, hash: [7u8; 32] }];
        let msg = Message::Inv(items);
        let decoded = Message::decode(msg.command(), &msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(matches!(Message::decode("bogus", &[]), Err(Error::UnknownCommand(_))));
    }
}
