//! Bitcoin P2P wire protocol primitives.
//!
//! This module implements:
//! - CompactSize integers and the 24-byte message header
//! - Checksummed frame encoding, into a fresh or a caller-sized buffer
//! - Typed payloads for the messages a lightweight peer exchanges
//! - Reassembly of frames from an arbitrary chunked byte stream
//!
//! Protocol reference:
//! https://developer.bitcoin.org/reference/p2p_networking.html
pub mod codec;

pub mod decode;
pub mod message;
pub mod payload;
pub mod reader;
pub mod reassembly;

pub mod constants;

pub use codec::{decode_varint, encode_frame, encode_frame_into, encode_frames, encode_varint};
pub use message::{Command, Decode, InvEntry, InvType, Payload};
pub use payload::Encode;
pub use reassembly::{DeserializedPayloads, Reassembler, Spill, deserialize};
