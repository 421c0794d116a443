use std::fmt::{self, Debug, Formatter};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use crate::error::WireError;
use crate::wire::constants::WITNESS_FLAG;
use crate::wire::decode::{decode_inventory, decode_nonce};

/// Implemented by types that can be decoded from a raw Bitcoin message payload.
pub trait Decode: Sized {
    fn decode(payload: &[u8]) -> Result<Self, WireError>;
}

/// The message kinds this client understands.
///
/// Anything else arriving on the wire is carried as
/// [`Payload::Unknown`] with its command name and raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Verack,
    Ping,
    Pong,
    Inv,
    GetData,
    Tx,
    Reject,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Version,
        Command::Verack,
        Command::Ping,
        Command::Pong,
        Command::Inv,
        Command::GetData,
        Command::Tx,
        Command::Reject,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::Tx => "tx",
            Command::Reject => "reject",
        }
    }

    pub fn from_name(name: &str) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Returns the 12-byte command field as defined by the Bitcoin P2P protocol.
    ///
    /// The command string is ASCII and padded with zero bytes.
    pub fn as_bytes(self) -> [u8; 12] {
        let name = self.name().as_bytes();
        let mut padded = [0u8; 12];
        padded[..name.len()].copy_from_slice(name);
        padded
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded message body.
///
/// Each variant owns its fields; encoding lives in
/// [`Encode`](crate::wire::payload::Encode) and decoding in
/// [`Payload::decode`].
///
/// See:
/// https://developer.bitcoin.org/reference/p2p_networking.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Version(VersionMessage),
    Verack,
    /// `None` is a nonce-less ping (pre-BIP31), sent as an empty body.
    Ping(Option<u64>),
    Pong(Option<u64>),
    Inv(Vec<InvEntry>),
    GetData(Vec<InvEntry>),
    /// Raw serialized transaction, kept verbatim.
    Tx(Vec<u8>),
    Reject(RejectMessage),
    /// Forward-compatible passthrough for commands we do not interpret.
    Unknown { command: String, data: Vec<u8> },
}

impl Payload {
    /// Decodes a message body according to its command name.
    ///
    /// Unrecognized commands are never an error: they become
    /// [`Payload::Unknown`] with the body untouched.
    pub fn decode(command: &str, body: &[u8]) -> Result<Payload, WireError> {
        let Some(kind) = Command::from_name(command) else {
            return Ok(Payload::Unknown {
                command: command.to_string(),
                data: body.to_vec(),
            });
        };

        match kind {
            Command::Version => Ok(Payload::Version(VersionMessage::decode(body)?)),
            Command::Verack => Ok(Payload::Verack),
            Command::Ping => Ok(Payload::Ping(decode_nonce(body, "ping: body must be empty or 8 bytes")?)),
            Command::Pong => Ok(Payload::Pong(decode_nonce(body, "pong: body must be empty or 8 bytes")?)),
            Command::Inv => Ok(Payload::Inv(decode_inventory(body)?)),
            Command::GetData => Ok(Payload::GetData(decode_inventory(body)?)),
            Command::Tx => Ok(Payload::Tx(body.to_vec())),
            Command::Reject => Ok(Payload::Reject(RejectMessage::decode(body)?)),
        }
    }

    /// The known command for this payload, `None` for passthrough payloads.
    pub fn command(&self) -> Option<Command> {
        match self {
            Payload::Version(_) => Some(Command::Version),
            Payload::Verack => Some(Command::Verack),
            Payload::Ping(_) => Some(Command::Ping),
            Payload::Pong(_) => Some(Command::Pong),
            Payload::Inv(_) => Some(Command::Inv),
            Payload::GetData(_) => Some(Command::GetData),
            Payload::Tx(_) => Some(Command::Tx),
            Payload::Reject(_) => Some(Command::Reject),
            Payload::Unknown { .. } => None,
        }
    }

    pub fn command_name(&self) -> &str {
        match self {
            Payload::Unknown { command, .. } => command,
            known => known.command().map(Command::name).unwrap_or_default(),
        }
    }
}

/// Network address as embedded in a `version` message (no timestamp).
///
/// IPv4 addresses travel in IPv4-mapped IPv6 form (`::ffff:a.b.c.d`);
/// the port is the only big-endian field in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddr {
    pub services: u64,
    pub ip: IpAddr,
    pub port: u16,
}

impl NetAddr {
    pub fn new(services: u64, addr: SocketAddr) -> Self {
        Self {
            services,
            ip: addr.ip(),
            port: addr.port(),
        }
    }

    pub fn unspecified(services: u64) -> Self {
        Self {
            services,
            ip: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            port: 0,
        }
    }

    /// The 16-byte address field as sent on the wire.
    pub fn ip_bytes(&self) -> [u8; 16] {
        match self.ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        }
    }

    pub fn from_ip_bytes(services: u64, bytes: [u8; 16], port: u16) -> Self {
        let v6 = Ipv6Addr::from(bytes);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        Self { services, ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: Services,
    pub timestamp: i64,
    pub addr_recv: NetAddr,
    pub addr_from: NetAddr,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    /// BIP37 relay flag; absent in bodies from very old peers.
    pub relay: Option<bool>,
}

/// Service flags as defined by the Bitcoin P2P protocol.
///
/// This is a bitfield (`u64`) transmitted in the `version` message.
/// Each bit represents a capability supported by the node.
///
/// Official reference:
/// https://developer.bitcoin.org/reference/p2p_networking.html#version
///
/// The flags are forward-compatible: unknown bits must be preserved.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Services(u64);

impl Services {
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns true if all bits in `other` are set.
    pub const fn contains(self, other: Services) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: Services) -> Services {
        Services(self.0 | other.0)
    }

    /// 0x00: Unnamed. Not a full node.
    pub const NONE: Services = Services(0x00);

    /// 0x01: NODE_NETWORK. Full node, can be asked for full blocks.
    pub const NODE_NETWORK: Services = Services(0x01);

    /// 0x04: NODE_BLOOM. Supports bloom-filtered connections (BIP111).
    pub const NODE_BLOOM: Services = Services(0x04);

    /// 0x08: NODE_WITNESS
    ///
    /// Can provide blocks and transactions including witness data.
    /// Defined in BIP144. Decides whether we ask for witness-flagged
    /// inventory.
    pub const NODE_WITNESS: Services = Services(0x08);

    /// 0x0400: NODE_NETWORK_LIMITED. Serves at least the last 288 blocks (BIP159).
    pub const NODE_NETWORK_LIMITED: Services = Services(0x0400);

    pub fn names(self) -> Vec<&'static str> {
        if self.is_empty() {
            return vec!["NONE"];
        }

        [
            (Self::NODE_NETWORK, "NODE_NETWORK"),
            (Self::NODE_BLOOM, "NODE_BLOOM"),
            (Self::NODE_WITNESS, "NODE_WITNESS"),
            (Self::NODE_NETWORK_LIMITED, "NODE_NETWORK_LIMITED"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

impl From<u64> for Services {
    fn from(value: u64) -> Self {
        Services::new(value)
    }
}

impl std::ops::BitOr for Services {
    type Output = Services;

    fn bitor(self, rhs: Services) -> Services {
        self.union(rhs)
    }
}

impl Debug for Services {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Services(NONE)");
        }

        let names = self.names().join(" | ");

        write!(f, "Services({}) [0x{:016x}]", names, self.bits())
    }
}

/// Inventory object types used in `inv` and `getdata` messages.
///
/// Defined by the Bitcoin P2P protocol:
/// https://developer.bitcoin.org/reference/p2p_networking.html#data-messages
///
/// These values are serialized as little-endian 32-bit unsigned integers.
/// The witness variants are the base type with [`WITNESS_FLAG`] set; they
/// are only valid inside `getdata`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InvType {
    /// Error / undefined type.
    Error = 0,
    Tx = 1,
    Block = 2,
    /// Filtered block (BIP37).
    FilteredBlock = 3,
    WitnessTx = WITNESS_FLAG | 1,
    WitnessBlock = WITNESS_FLAG | 2,
    WitnessFilteredBlock = WITNESS_FLAG | 3,
}

impl InvType {
    pub fn from_u32(raw: u32) -> Option<InvType> {
        match raw {
            0 => Some(InvType::Error),
            1 => Some(InvType::Tx),
            2 => Some(InvType::Block),
            3 => Some(InvType::FilteredBlock),
            x if x == WITNESS_FLAG | 1 => Some(InvType::WitnessTx),
            x if x == WITNESS_FLAG | 2 => Some(InvType::WitnessBlock),
            x if x == WITNESS_FLAG | 3 => Some(InvType::WitnessFilteredBlock),
            _ => None,
        }
    }

    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Serialize the inventory type to little-endian bytes for wire usage.
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.as_u32().to_le_bytes()
    }

    pub const fn is_witness(self) -> bool {
        self.as_u32() & WITNESS_FLAG != 0
    }

    pub const fn is_tx(self) -> bool {
        matches!(self, InvType::Tx | InvType::WitnessTx)
    }

    pub const fn is_block(self) -> bool {
        matches!(self, InvType::Block | InvType::WitnessBlock)
    }

    /// The witness-flagged counterpart, for types that have one.
    pub fn with_witness(self) -> InvType {
        InvType::from_u32(self.as_u32() | WITNESS_FLAG).unwrap_or(self)
    }
}

/// One `(type, hash)` pair of an `inv` or `getdata` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvEntry {
    pub inv_type: InvType,
    /// Internal byte order, as on the wire.
    pub hash: [u8; 32],
}

impl InvEntry {
    pub const fn new(inv_type: InvType, hash: [u8; 32]) -> Self {
        Self { inv_type, hash }
    }

    pub const fn tx(hash: [u8; 32]) -> Self {
        Self::new(InvType::Tx, hash)
    }

    pub const fn block(hash: [u8; 32]) -> Self {
        Self::new(InvType::Block, hash)
    }

    /// Hash as block explorers print it (byte-reversed hex).
    pub fn hash_hex(&self) -> String {
        let mut display = self.hash;
        display.reverse();
        hex::encode(display)
    }
}

/// BIP61 reject codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    Malformed,
    Invalid,
    Obsolete,
    Duplicate,
    Nonstandard,
    Dust,
    InsufficientFee,
    Checkpoint,
    Other(u8),
}

impl From<u8> for RejectCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => RejectCode::Malformed,
            0x10 => RejectCode::Invalid,
            0x11 => RejectCode::Obsolete,
            0x12 => RejectCode::Duplicate,
            0x40 => RejectCode::Nonstandard,
            0x41 => RejectCode::Dust,
            0x42 => RejectCode::InsufficientFee,
            0x43 => RejectCode::Checkpoint,
            other => RejectCode::Other(other),
        }
    }
}

impl From<RejectCode> for u8 {
    fn from(code: RejectCode) -> u8 {
        match code {
            RejectCode::Malformed => 0x01,
            RejectCode::Invalid => 0x10,
            RejectCode::Obsolete => 0x11,
            RejectCode::Duplicate => 0x12,
            RejectCode::Nonstandard => 0x40,
            RejectCode::Dust => 0x41,
            RejectCode::InsufficientFee => 0x42,
            RejectCode::Checkpoint => 0x43,
            RejectCode::Other(other) => other,
        }
    }
}

/// A peer refusing one of our messages.
///
/// `data` is whatever follows the reason string; for `tx` and `block`
/// rejects it is usually the 32-byte hash, but no structure is assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectMessage {
    pub message: Command,
    pub code: RejectCode,
    pub reason: String,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn command_names_round_trip() {
        for command in Command::ALL {
            assert_eq!(Command::from_name(command.name()), Some(command));
            assert!(command.name().len() < 12);
        }
        assert_eq!(Command::from_name("sendcmpct"), None);
        assert_eq!(&Command::GetData.as_bytes(), b"getdata\0\0\0\0\0");
    }

    #[test]
    fn unknown_command_keeps_bytes() {
        let payload = Payload::decode("sendcmpct", &[0, 2, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(
            payload,
            Payload::Unknown {
                command: "sendcmpct".into(),
                data: vec![0, 2, 0, 0, 0, 0, 0, 0, 0],
            }
        );
        assert_eq!(payload.command_name(), "sendcmpct");
        assert_eq!(payload.command(), None);
    }

    #[test]
    fn verack_ignores_body() {
        assert_eq!(Payload::decode("verack", &[1, 2]).unwrap(), Payload::Verack);
    }

    #[test]
    fn inv_type_witness_mapping() {
        assert_eq!(InvType::Tx.with_witness(), InvType::WitnessTx);
        assert_eq!(InvType::Block.with_witness(), InvType::WitnessBlock);
        assert_eq!(InvType::Error.with_witness(), InvType::Error);
        assert_eq!(InvType::WitnessTx.as_u32(), 0x4000_0001);
        assert!(InvType::WitnessBlock.is_witness());
        assert!(InvType::WitnessBlock.is_block());
        assert!(!InvType::FilteredBlock.is_block());
        assert_eq!(InvType::from_u32(0x4000_0000), None);
        assert_eq!(InvType::from_u32(4), None);
    }

    #[test]
    fn net_addr_ipv4_uses_mapped_form() {
        let addr = NetAddr::new(8, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 8333));
        let bytes = addr.ip_bytes();
        assert_eq!(&bytes[..12], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);
        assert_eq!(&bytes[12..], &[10, 0, 0, 1]);
        assert_eq!(NetAddr::from_ip_bytes(8, bytes, 8333), addr);
    }

    #[test]
    fn services_debug_lists_names() {
        let s = Services::NODE_NETWORK | Services::NODE_WITNESS;
        assert_eq!(s.names(), vec!["NODE_NETWORK", "NODE_WITNESS"]);
        assert_eq!(format!("{:?}", Services::NONE), "Services(NONE)");
    }

    #[test]
    fn reject_codes_round_trip_through_u8() {
        for raw in [0x01u8, 0x10, 0x11, 0x12, 0x40, 0x41, 0x42, 0x43, 0x99] {
            assert_eq!(u8::from(RejectCode::from(raw)), raw);
        }
        assert_eq!(RejectCode::from(0x42), RejectCode::InsufficientFee);
    }
}
