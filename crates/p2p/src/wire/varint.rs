//! Bitcoin-style CompactSize integers and length-prefixed byte strings.
use super::{Error, Result};

pub fn write_varint(out: &mut Vec<u8>, n: u64) {
    if n < 0xFD {
        out.push(n as u8);
    } else if n <= 0xFFFF {
        out.push(0xFD);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xFFFF_FFFF {
        out.push(0xFE);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xFF);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

/// Reads a CompactSize integer, returning the value and the number of bytes consumed.
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let prefix = *buf.first().ok_or(Error::Truncated { need: 1, have: 0 })?;

    match prefix {
        0xFF => {
            let bytes = take(buf, 1, 8)?;
            let v = u64::from_le_bytes(bytes.try_into().unwrap());
            if v <= 0xFFFF_FFFF {
                return Err(Error::NonCanonicalVarint);
            }
            Ok((v, 9))
        }
        0xFE => {
            let bytes = take(buf, 1, 4)?;
            let v = u32::from_le_bytes(bytes.try_into().unwrap()) as u64;
            if v <= 0xFFFF {
                return Err(Error::NonCanonicalVarint);
            }
            Ok((v, 5))
        }
        0xFD => {
            let bytes = take(buf, 1, 2)?;
            let v = u16::from_le_bytes(bytes.try_into().unwrap()) as u64;
            if v < 0xFD {
                return Err(Error::NonCanonicalVarint);
            }
            Ok((v, 3))
        }
        n => Ok((n as u64, 1)),
    }
}

fn take(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    buf.get(offset..offset + len).ok_or(Error::Truncated {
        need: offset + len,
        have: buf.len(),
    })
}

pub fn write_var_str(out: &mut Vec<u8>, s: &str) {
    write_varint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

/// Reads a varint-length-prefixed UTF-8 string, capped at `max_len` bytes.
pub fn read_var_str(buf: &[u8], max_len: usize) -> Result<(String, usize)> {
    let (len, prefix_len) = read_varint(buf)?;
    let len = len as usize;
    if len > max_len {
        return Err(Error::OversizedString { got: len, max: max_len });
    }
    let bytes = take(buf, prefix_len, len)?;
    let s = String::from_utf8_lossy(bytes).into_owned();
    Ok((s, prefix_len + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_size_class() {
        for n in [0u64, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, 0x1_0000_0000] {
            let mut buf = Vec::new();
            write_varint(&mut buf, n);
            let (got, consumed) = read_varint(&buf).unwrap();
            assert_eq!(got, n);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn rejects_non_canonical_encoding() {
        // 0xFD prefix followed by a value that fits in a single byte.
        let buf = [0xFDu8, 0x05, 0x00];
        assert_eq!(read_varint(&buf), Err(Error::NonCanonicalVarint));
    }

    #[test]
    fn truncated_input_is_an_error() {
        assert!(read_varint(&[0xFD, 0x01]).is_err());
    }
}
