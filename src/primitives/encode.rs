//! Consensus wire encoding
//!
//! Little-endian integers, CompactSize varints and length-prefixed byte
//! strings as used by the reference implementation's raw block/transaction
//! hex format.

use thiserror::Error;

/// Decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),

    #[error("non-canonical varint at offset {0}")]
    NonCanonicalVarint(usize),

    #[error("length {length} exceeds limit {limit}")]
    Oversized { length: u64, limit: u64 },

    #[error("{0} trailing bytes after object")]
    TrailingBytes(usize),

    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("superfluous witness flag")]
    SuperfluousWitness,
}

/// Largest length prefix accepted while decoding
pub const MAX_DECODE_LENGTH: u64 = 4_000_000;

/// Append-only consensus encoder
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn varint(&mut self, v: u64) -> &mut Self {
        match v {
            0..=0xfc => self.buf.push(v as u8),
            0xfd..=0xffff => {
                self.buf.push(0xfd);
                self.buf.extend_from_slice(&(v as u16).to_le_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.buf.push(0xfe);
                self.buf.extend_from_slice(&(v as u32).to_le_bytes());
            }
            _ => {
                self.buf.push(0xff);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        self
    }

    /// Length-prefixed byte string
    pub fn var_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.varint(v.len() as u64);
        self.bytes(v)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based consensus decoder
#[derive(Debug)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn peek(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let (value, min) = match self.u8()? {
            0xfd => (u16::from_le_bytes(self.array()?) as u64, 0xfd),
            0xfe => (u32::from_le_bytes(self.array()?) as u64, 0x1_0000),
            0xff => (u64::from_le_bytes(self.array()?), 0x1_0000_0000),
            small => return Ok(small as u64),
        };
        if value < min {
            return Err(DecodeError::NonCanonicalVarint(start));
        }
        Ok(value)
    }

    /// Varint used as a length or count, bounded by [`MAX_DECODE_LENGTH`]
    pub fn length(&mut self) -> Result<usize, DecodeError> {
        let length = self.varint()?;
        if length > MAX_DECODE_LENGTH {
            return Err(DecodeError::Oversized {
                length,
                limit: MAX_DECODE_LENGTH,
            });
        }
        Ok(length as usize)
    }

    pub fn var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.length()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Fail unless every byte was consumed
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

/// Decode a hex string into bytes
pub fn decode_hex(s: &str) -> Result<Vec<u8>, DecodeError> {
    hex::decode(s.trim()).map_err(|e| DecodeError::Hex(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        for (value, len) in [
            (0u64, 1usize),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
        ] {
            let mut enc = Encoder::new();
            enc.varint(value);
            let bytes = enc.into_bytes();
            assert_eq!(bytes.len(), len, "value {:#x}", value);
            assert_eq!(Decoder::new(&bytes).varint().unwrap(), value);
        }
    }

    #[test]
    fn test_non_canonical_varint_rejected() {
        // 0x10 encoded with the 0xfd prefix
        let bytes = [0xfd, 0x10, 0x00];
        assert_eq!(
            Decoder::new(&bytes).varint(),
            Err(DecodeError::NonCanonicalVarint(0))
        );
    }

    #[test]
    fn test_truncated_input() {
        let mut dec = Decoder::new(&[0x01, 0x02]);
        assert_eq!(dec.u32(), Err(DecodeError::UnexpectedEof(0)));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut enc = Encoder::new();
        enc.varint(MAX_DECODE_LENGTH + 1);
        let bytes = enc.into_bytes();
        assert!(matches!(
            Decoder::new(&bytes).length(),
            Err(DecodeError::Oversized { .. })
        ));
    }
}
