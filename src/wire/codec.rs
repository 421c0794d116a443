use std::borrow::Cow;
use std::io::{self, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use sha2::{Digest, Sha256};

use crate::error::WireError;
use crate::wire::constants::{
    CHECKSUM_OFFSET, COMMAND_LEN, COMMAND_OFFSET, HEADER_LEN, LENGTH_OFFSET, MAGIC_OFFSET,
};
use crate::wire::message::Payload;
use crate::wire::payload::Encode;

/// Number of bytes [`write_varint`] uses for `value`.
pub fn varint_len(value: u64) -> usize {
    match value {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

/// Writes `value` as a CompactSize integer and returns the bytes written.
///
/// ```text
/// < 0xFD        1 byte
/// <= 0xFFFF     0xFD + u16 LE
/// <= 0xFFFFFFFF 0xFE + u32 LE
/// otherwise     0xFF + u64 LE
/// ```
///
/// https://developer.bitcoin.org/reference/transactions.html#compactsize-unsigned-integers
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> io::Result<usize> {
    match value {
        0..=0xFC => writer.write_u8(value as u8)?,
        0xFD..=0xFFFF => {
            writer.write_u8(0xFD)?;
            writer.write_u16::<LittleEndian>(value as u16)?;
        }
        0x1_0000..=0xFFFF_FFFF => {
            writer.write_u8(0xFE)?;
            writer.write_u32::<LittleEndian>(value as u32)?;
        }
        _ => {
            writer.write_u8(0xFF)?;
            writer.write_u64::<LittleEndian>(value)?;
        }
    }
    Ok(varint_len(value))
}

pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(varint_len(value));
    // Writing into a Vec cannot fail.
    let _ = write_varint(&mut out, value);
    out
}

/// Decodes a CompactSize integer from the front of `buf`.
///
/// Returns the value and the number of bytes it occupied.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize), WireError> {
    let first = *buf.first().ok_or(WireError::MalformedVarint {
        needed: 1,
        available: 0,
    })?;

    let needed = match first {
        0xFD => 3,
        0xFE => 5,
        0xFF => 9,
        n => return Ok((n as u64, 1)),
    };

    let bytes = buf.get(1..needed).ok_or(WireError::MalformedVarint {
        needed,
        available: buf.len(),
    })?;

    let value = match needed {
        3 => LittleEndian::read_u16(bytes) as u64,
        5 => LittleEndian::read_u32(bytes) as u64,
        _ => LittleEndian::read_u64(bytes),
    };

    Ok((value, needed))
}

/// SHA256(SHA256(data)).
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let hash = Sha256::digest(Sha256::digest(data));

    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    result
}

/// The first 4 bytes of SHA256(SHA256(payload)).
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let hash = sha256d(payload);
    [hash[0], hash[1], hash[2], hash[3]]
}

/// The 24-byte header in front of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub command: [u8; COMMAND_LEN],
    pub length: u32,
    pub checksum: [u8; 4],
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Self {
        let mut command = [0u8; COMMAND_LEN];
        command.copy_from_slice(&bytes[COMMAND_OFFSET..LENGTH_OFFSET]);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&bytes[CHECKSUM_OFFSET..HEADER_LEN]);

        FrameHeader {
            magic: LittleEndian::read_u32(&bytes[MAGIC_OFFSET..COMMAND_OFFSET]),
            command,
            length: LittleEndian::read_u32(&bytes[LENGTH_OFFSET..CHECKSUM_OFFSET]),
            checksum,
        }
    }

    /// The command name up to its null terminator.
    ///
    /// `None` when the 12-byte field has no terminator, which marks the
    /// header as corrupt.
    pub fn command_name(&self) -> Option<Cow<'_, str>> {
        let end = self.command.iter().position(|&b| b == 0)?;
        Some(String::from_utf8_lossy(&self.command[..end]))
    }

    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.length as usize
    }
}

/// Null-padded 12-byte command field for `name`.
///
/// The name must leave room for at least one terminating zero byte.
pub fn command_field(name: &str) -> Result<[u8; COMMAND_LEN], WireError> {
    let bytes = name.as_bytes();
    if bytes.len() >= COMMAND_LEN || bytes.contains(&0) {
        return Err(WireError::CommandTooLong(name.to_string()));
    }
    let mut field = [0u8; COMMAND_LEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// Size of the complete frame (header + body) for `payload`.
pub fn frame_len(payload: &Payload) -> usize {
    HEADER_LEN + payload.encoded_len()
}

/// Serializes `payload` as a complete frame into the front of `buf`.
///
/// Returns the number of bytes written. When `buf` is too small nothing is
/// written and the error carries the required size, so callers can size a
/// buffer for several messages once and fill it contiguously.
pub fn encode_frame_into(payload: &Payload, magic: u32, buf: &mut [u8]) -> Result<usize, WireError> {
    let body_len = payload.encoded_len();
    let required = HEADER_LEN + body_len;
    if buf.len() < required {
        return Err(WireError::BufferTooSmall {
            required,
            available: buf.len(),
        });
    }

    let command = command_field(payload.command_name())?;

    let (header, rest) = buf.split_at_mut(HEADER_LEN);
    let body = &mut rest[..body_len];
    {
        let mut writer: &mut [u8] = &mut *body;
        payload.encode(&mut writer)?;
        debug_assert!(writer.is_empty(), "encoded_len disagrees with encode");
    }

    // An empty payload hashes the empty buffer: 5d f6 e0 e2.
    let sum = checksum(body);

    LittleEndian::write_u32(&mut header[MAGIC_OFFSET..COMMAND_OFFSET], magic);
    header[COMMAND_OFFSET..LENGTH_OFFSET].copy_from_slice(&command);
    LittleEndian::write_u32(&mut header[LENGTH_OFFSET..CHECKSUM_OFFSET], body_len as u32);
    header[CHECKSUM_OFFSET..HEADER_LEN].copy_from_slice(&sum);

    Ok(required)
}

/// Serializes `payload` as a complete frame into a new buffer.
pub fn encode_frame(payload: &Payload, magic: u32) -> Result<Vec<u8>, WireError> {
    let mut buf = vec![0u8; frame_len(payload)];
    encode_frame_into(payload, magic, &mut buf)?;
    Ok(buf)
}

/// Serializes several payloads back to back into one buffer, sized once.
pub fn encode_frames(payloads: &[Payload], magic: u32) -> Result<Vec<u8>, WireError> {
    let total = payloads.iter().map(frame_len).sum();
    let mut buf = vec![0u8; total];

    let mut offset = 0;
    for payload in payloads {
        offset += encode_frame_into(payload, magic, &mut buf[offset..])?;
    }

    Ok(buf)
}
