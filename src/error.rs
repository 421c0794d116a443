//! Error types for the wire codec and the peer session.

use std::io;

use thiserror::Error;

use crate::wire::message::InvType;

/// Errors raised while encoding or decoding wire data.
///
/// Every decode error is local to one frame: the reassembler drops the frame
/// and keeps reading the stream.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ended before the bytes announced by the varint marker.
    #[error("malformed varint: need {needed} bytes, have {available}")]
    MalformedVarint { needed: usize, available: usize },

    /// A payload body is truncated or structurally invalid.
    #[error("payload decode error: {0}")]
    PayloadDecode(&'static str),

    /// An `inv`/`getdata` body announces more entries than we accept.
    #[error("inventory count {count} exceeds maximum of {max}")]
    InventoryTooLarge { count: u64, max: usize },

    /// An inventory entry carries a type tag not allowed for its message.
    #[error("invalid inventory type 0x{0:08x}")]
    InvalidInventoryType(u32),

    /// A `reject` names a message type we do not speak.
    #[error("reject refers to unknown message type `{0}`")]
    UnknownRejectedType(String),

    /// Command names are limited to 12 ASCII bytes on the wire.
    #[error("command name `{0}` does not fit the 12-byte header field")]
    CommandTooLong(String),

    /// The caller-supplied buffer cannot hold the encoded frame.
    #[error("buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall { required: usize, available: usize },

    #[error("encode failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by [`Session`](crate::session::Session).
#[derive(Debug, Error)]
pub enum NodeError {
    /// A connection loop is already running for this session.
    #[error("another connect attempt is underway")]
    AlreadyConnecting,

    /// The peer's `version` arrived on a different network than configured.
    #[error("magic word mismatch: expected 0x{expected:08x}, got 0x{got:08x}")]
    ProtocolMismatch { expected: u32, got: u32 },

    /// Transactions can only be requested with `Tx`/`WitnessTx` entries.
    #[error("inventory type {0:?} cannot be used to request a transaction")]
    InvalidRequestType(InvType),

    #[error("peer did not acknowledge the version message in time")]
    HandshakeTimeout,

    #[error("peer disconnected before completing the handshake")]
    PeerDisconnected,

    #[error("session is shutting down")]
    ShuttingDown,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}
