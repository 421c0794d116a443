//! Splits a raw byte stream into decoded payloads.
//!
//! The transport hands over chunks of whatever size the socket produced, so
//! a frame may start in one chunk and end several chunks later. Bytes of an
//! unfinished frame are carried forward as a [`Spill`] and stitched onto the
//! front of the next chunk.
//!
//! Corruption never stops the stream: when the bytes at the current offset
//! are not the magic word we scan forward for it, frames with a bad checksum
//! are stepped over, and bodies that fail to decode are dropped.

use tracing::{debug, trace, warn};

use crate::wire::codec::{FrameHeader, checksum};
use crate::wire::constants::{HEADER_LEN, MAGIC_LEN, MAX_PAYLOAD_SIZE, SPILL_WARN_ITERATIONS};
use crate::wire::message::Payload;

/// A checksum-verified frame located inside a scanned buffer.
#[derive(Debug)]
struct Frame<'a> {
    start: usize,
    header: FrameHeader,
    body: &'a [u8],
}

#[derive(Debug, Default)]
struct Scan<'a> {
    frames: Vec<Frame<'a>>,
    /// Offset of an unfinished frame at the end of the buffer.
    tail: Option<usize>,
}

/// Finds the next candidate frame start after position 0 of `rest`.
///
/// A candidate is a byte equal to the first magic byte whose following
/// bytes agree with the magic word for as long as the buffer lasts, so a
/// magic word cut off by the end of the chunk is still found.
fn next_magic(rest: &[u8], magic: &[u8; MAGIC_LEN]) -> Option<usize> {
    (1..rest.len()).find(|&i| {
        rest[i] == magic[0] && magic.starts_with(&rest[i..rest.len().min(i + MAGIC_LEN)])
    })
}

fn scan(buf: &[u8], magic: u32) -> Scan<'_> {
    let magic = magic.to_le_bytes();
    let mut scan = Scan::default();
    let mut offset = 0;

    while offset < buf.len() {
        let rest = &buf[offset..];

        if !magic.starts_with(&rest[..rest.len().min(MAGIC_LEN)]) {
            match next_magic(rest, &magic) {
                Some(skip) => {
                    trace!(skipped = skip, "resynchronizing on magic word");
                    offset += skip;
                    continue;
                }
                None => break,
            }
        }

        if rest.len() < HEADER_LEN {
            scan.tail = Some(offset);
            break;
        }

        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&rest[..HEADER_LEN]);
        let header = FrameHeader::parse(&raw);

        if header.command_name().is_none() || header.length as usize > MAX_PAYLOAD_SIZE {
            debug!(offset, length = header.length, "corrupt header, rescanning");
            offset += MAGIC_LEN;
            continue;
        }

        let frame_len = header.frame_len();
        if rest.len() < frame_len {
            scan.tail = Some(offset);
            break;
        }

        let body = &rest[HEADER_LEN..frame_len];
        if checksum(body) == header.checksum {
            scan.frames.push(Frame {
                start: offset,
                header,
                body,
            });
        } else {
            debug!(
                command = %header.command_name().unwrap_or_default(),
                length = header.length,
                "checksum mismatch, dropping frame"
            );
        }
        offset += frame_len;
    }

    scan
}

fn decode_frames(frames: &[Frame<'_>], out: &mut Vec<Payload>) {
    for frame in frames {
        let command = frame.header.command_name().unwrap_or_default();
        match Payload::decode(&command, frame.body) {
            Ok(payload) => out.push(payload),
            Err(error) => debug!(%command, %error, "dropping undecodable frame"),
        }
    }
}

/// Bytes of a frame whose end has not arrived yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spill {
    pub data: Vec<u8>,
    /// Number of chunks this spill has been carried across without completing.
    pub iterations: u32,
}

impl Spill {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            iterations: 0,
        }
    }
}

/// Result of one reassembly pass.
#[derive(Debug, Default)]
pub struct DeserializedPayloads {
    /// Payloads completed by the previous spill come first, then the ones
    /// decoded from the chunk itself.
    pub payloads: Vec<Payload>,
    pub spill: Option<Spill>,
}

/// Runs one reassembly pass over `chunk`, continuing `prev` if the last
/// pass ended inside a frame.
pub fn deserialize(chunk: &[u8], magic: u32, prev: Option<Spill>) -> DeserializedPayloads {
    let fresh = scan(chunk, magic);
    let mut result = DeserializedPayloads::default();

    let Some(prev) = prev else {
        decode_frames(&fresh.frames, &mut result.payloads);
        result.spill = fresh.tail.map(|t| Spill::new(chunk[t..].to_vec()));
        return result;
    };

    // The spill continues up to the first frame that verifies on its own.
    let lead = fresh.frames.first().map_or(chunk.len(), |f| f.start);

    let mut combined = prev.data;
    combined.extend_from_slice(&chunk[..lead]);

    let stitched = scan(&combined, magic);
    decode_frames(&stitched.frames, &mut result.payloads);

    if fresh.frames.is_empty() {
        result.spill = stitched.tail.map(|t| {
            let iterations = if t == 0 { prev.iterations + 1 } else { 0 };
            if iterations == SPILL_WARN_ITERATIONS {
                warn!(
                    iterations,
                    bytes = combined.len(),
                    "spill still incomplete; peer may be stalled"
                );
            }
            Spill {
                data: combined[t..].to_vec(),
                iterations,
            }
        });
        return result;
    }

    match stitched.tail {
        Some(t) => warn!(
            bytes = combined.len() - t,
            "spill did not complete before the next frame; dropping it"
        ),
        None if prev.iterations > 0 => {
            debug!(iterations = prev.iterations, "spill completed")
        }
        None => {}
    }

    decode_frames(&fresh.frames, &mut result.payloads);
    result.spill = fresh.tail.map(|t| Spill::new(chunk[t..].to_vec()));
    result
}

/// Stateful wrapper around [`deserialize`] that owns the spill between
/// chunks of one connection.
#[derive(Debug)]
pub struct Reassembler {
    magic: u32,
    spill: Option<Spill>,
}

impl Reassembler {
    pub fn new(magic: u32) -> Self {
        Self { magic, spill: None }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Payload> {
        let DeserializedPayloads { payloads, spill } = deserialize(chunk, self.magic, self.spill.take());
        self.spill = spill;
        payloads
    }

    /// Bytes currently held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.spill.as_ref().map_or(0, |s| s.data.len())
    }

    pub fn spill(&self) -> Option<&Spill> {
        self.spill.as_ref()
    }
}
