//! Bounds-checked cursor over a payload body.
//!
//! Every decode routine reads through a [`ByteReader`]: each read advances
//! the position and fails with [`WireError::PayloadDecode`] instead of
//! reading past the end of the buffer.

use crate::error::WireError;
use crate::wire::codec::decode_varint;

#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize, ctx: &'static str) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(WireError::PayloadDecode(ctx))?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(WireError::PayloadDecode(ctx))?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self, ctx: &'static str) -> Result<[u8; N], WireError> {
        self.read_bytes(N, ctx)?
            .try_into()
            .map_err(|_| WireError::PayloadDecode(ctx))
    }

    pub fn read_u8(&mut self, ctx: &'static str) -> Result<u8, WireError> {
        Ok(self.read_array::<1>(ctx)?[0])
    }

    pub fn read_u16_be(&mut self, ctx: &'static str) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.read_array(ctx)?))
    }

    pub fn read_u32(&mut self, ctx: &'static str) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.read_array(ctx)?))
    }

    pub fn read_i32(&mut self, ctx: &'static str) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.read_array(ctx)?))
    }

    pub fn read_u64(&mut self, ctx: &'static str) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.read_array(ctx)?))
    }

    pub fn read_i64(&mut self, ctx: &'static str) -> Result<i64, WireError> {
        Ok(i64::from_le_bytes(self.read_array(ctx)?))
    }

    /// Reads a CompactSize integer.
    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let (value, consumed) = decode_varint(&self.buf[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    /// Reads a varint length prefix followed by that many bytes.
    ///
    /// `max` bounds the announced length before anything is sliced.
    pub fn read_var_bytes(&mut self, max: usize, ctx: &'static str) -> Result<&'a [u8], WireError> {
        let len = self.read_varint()?;
        if len > max as u64 {
            return Err(WireError::PayloadDecode(ctx));
        }
        self.read_bytes(len as usize, ctx)
    }

    /// Consumes and returns everything left in the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_advance_the_cursor() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&(-2i64).to_le_bytes());
        bytes.extend_from_slice(&8333u16.to_be_bytes());

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u32("u32").unwrap(), 7);
        assert_eq!(r.read_i64("i64").unwrap(), -2);
        assert_eq!(r.read_u16_be("port").unwrap(), 8333);
        assert!(r.is_empty());
    }

    #[test]
    fn short_read_fails_without_moving() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        assert!(matches!(
            r.read_u32("field"),
            Err(WireError::PayloadDecode("field"))
        ));
        assert_eq!(r.position(), 0);
        assert_eq!(r.remaining(), 3);
    }

    #[test]
    fn var_bytes_respects_maximum() {
        let bytes = [3u8, b'a', b'b', b'c'];
        assert_eq!(ByteReader::new(&bytes).read_var_bytes(3, "s").unwrap(), b"abc");
        assert!(ByteReader::new(&bytes).read_var_bytes(2, "s").is_err());
    }

    #[test]
    fn var_bytes_with_huge_length_fails_cleanly() {
        let mut bytes = vec![0xFF];
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        let mut r = ByteReader::new(&bytes);
        assert!(r.read_var_bytes(usize::MAX, "s").is_err());
    }

    #[test]
    fn rest_drains_remaining_bytes() {
        let mut r = ByteReader::new(&[9, 8, 7]);
        r.read_u8("b").unwrap();
        assert_eq!(r.rest(), &[8, 7]);
        assert!(r.is_empty());
    }
}
