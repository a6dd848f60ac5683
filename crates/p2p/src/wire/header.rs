//! The 24-byte wire message header.
use bitcoin_hashes::{sha256d, Hash};

use super::{Error, Result, MAX_MESSAGE_SIZE};

pub const HEADER_LEN: usize = 24;
const COMMAND_LEN: usize = 12;

/// A parsed message header, preceding every payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    command: [u8; COMMAND_LEN],
    pub length: u32,
    pub checksum: [u8; 4],
}

impl Header {
    /// Build a header for `command` and `payload`, computing the checksum.
    pub fn for_payload(magic: u32, command: &str, payload: &[u8]) -> Self {
        Self {
            magic,
            command: encode_command(command),
            length: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    /// The command string, with trailing NULs stripped.
    pub fn command(&self) -> Result<&str> {
        let end = self
            .command
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_LEN);
        if self.command[end..].iter().any(|&b| b != 0) {
            return Err(Error::BadCommand(self.command.to_vec()));
        }
        std::str::from_utf8(&self.command[..end]).map_err(|_| Error::BadCommand(self.command.to_vec()))
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..16].copy_from_slice(&self.command);
        out[16..20].copy_from_slice(&self.length.to_le_bytes());
        out[20..24].copy_from_slice(&self.checksum);
        out
    }

    /// Parse a header from exactly [`HEADER_LEN`] bytes, validating magic and size cap.
    pub fn decode(buf: &[u8], expected_magic: u32) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Truncated {
                need: HEADER_LEN,
                have: buf.len(),
            });
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != expected_magic {
            return Err(Error::BadMagic(magic));
        }
        let mut command = [0u8; COMMAND_LEN];
        command.copy_from_slice(&buf[4..16]);
        let length = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        if length > MAX_MESSAGE_SIZE {
            return Err(Error::OversizedMessage(length));
        }
        let mut chk = [0u8; 4];
        chk.copy_from_slice(&buf[20..24]);

        let header = Self {
            magic,
            command,
            length,
            checksum: chk,
        };
        header.command()?;
        Ok(header)
    }

    /// Verify a payload against this header's checksum.
    pub fn verify(&self, payload: &[u8]) -> Result<()> {
        if payload.len() as u32 != self.length {
            return Err(Error::Truncated {
                need: self.length as usize,
                have: payload.len(),
            });
        }
        if checksum(payload) != self.checksum {
            return Err(Error::BadChecksum);
        }
        Ok(())
    }
}

fn encode_command(command: &str) -> [u8; COMMAND_LEN] {
    let mut out = [0u8; COMMAND_LEN];
    let bytes = command.as_bytes();
    out[..bytes.len().min(COMMAND_LEN)].copy_from_slice(&bytes[..bytes.len().min(COMMAND_LEN)]);
    out
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let hash = sha256d::Hash::hash(payload);
    let bytes = hash.into_inner();
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let h = Header::for_payload(super::super::MAGIC_TESTNET, "ping", &[1, 2, 3, 4, 5, 6, 7, 8]);
        let encoded = h.encode();
        let decoded = Header::decode(&encoded, super::super::MAGIC_TESTNET).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(decoded.command().unwrap(), "ping");
    }

    #[test]
    fn rejects_wrong_magic() {
        let h = Header::for_payload(super::super::MAGIC_TESTNET, "ping", &[]);
        let encoded = h.encode();
        assert_eq!(
            Header::decode(&encoded, super::super::MAGIC_MAINNET),
            Err(Error::BadMagic(super::super::MAGIC_TESTNET))
        );
    }

    #[test]
    fn rejects_oversized_length() {
        let mut buf = Header::for_payload(super::super::MAGIC_TESTNET, "ping", &[]).encode();
        buf[16..20].copy_from_slice(&(MAX_MESSAGE_SIZE + 1).to_le_bytes());
        assert!(matches!(
            Header::decode(&buf, super::super::MAGIC_TESTNET),
            Err(Error::OversizedMessage(_))
        ));
    }

    #[test]
    fn rejects_truncated_input() {
        let buf = [0u8; HEADER_LEN - 1];
        assert!(Header::decode(&buf, super::super::MAGIC_TESTNET).is_err());
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let h = Header::for_payload(super::super::MAGIC_TESTNET, "ping", &[1, 2, 3]);
        assert!(h.verify(&[9, 9, 9]).is_err());
        assert!(h.verify(&[1, 2, 3]).is_ok());
    }
}
