/// Network magic value used in the Bitcoin P2P message header.
///
/// The first 4 bytes of every Bitcoin P2P message identify the
/// network (mainnet, testnet, regtest, signet) and act as a
/// message boundary marker in the TCP stream. The reassembler
/// resynchronizes on this value after corrupted input.
///
/// For mainnet, the magic value is `0xD9B4BEF9` (F9 BE B4 D9 in bytes).
///
/// You can also see how Bitcoin Core maps magic values to networks
/// in `GetNetworkForMagic`:
/// https://github.com/bitcoin/bitcoin/blob/master/src/kernel/chainparams.cpp#L703-L723
pub const MAIN_NET_MAGIC: u32 = 0xD9B4BEF9;
pub const TEST_NET3_MAGIC: u32 = 0x0709110B;
pub const REGTEST_MAGIC: u32 = 0xDAB5BFFA;
pub const SIGNET_MAGIC: u32 = 0x40CF030A;

/// Current Bitcoin P2P protocol version.
///
/// This value is sent in the `version` message during handshake
/// and is used for peer capability negotiation and feature gating.
///
/// The protocol version is defined in Bitcoin Core:
/// https://github.com/bitcoin/bitcoin/blob/707ad466968b947b364cfc25bcb4d6895e799418/src/node/protocol_version.h#L12
///
/// It is serialized on the wire as a signed 32-bit little-endian integer.
pub const PROTOCOL_VERSION: i32 = 70016;

// Message header layout:
//
// +------------+--------------+---------------+------------+
// | magic (4)  | command (12) | length (4 LE) | checksum(4)|
// +------------+--------------+---------------+------------+
pub const MAGIC_LEN: usize = 4;
pub const COMMAND_LEN: usize = 12;
pub const MAGIC_OFFSET: usize = 0;
pub const COMMAND_OFFSET: usize = 4;
pub const LENGTH_OFFSET: usize = 16;
pub const CHECKSUM_OFFSET: usize = 20;
pub const HEADER_LEN: usize = 24;

/// Largest payload a header may declare before we treat it as corrupt.
///
/// Matches Bitcoin Core's `MAX_SIZE` (32 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Maximum number of entries accepted in a single `inv` or `getdata`.
///
/// https://developer.bitcoin.org/reference/p2p_networking.html#inv
pub const INV_MAX: usize = 50_000;

/// 4-byte type tag followed by a 32-byte hash.
pub const INV_ENTRY_LEN: usize = 36;

/// Bit OR'd into an inventory type to ask for witness data (BIP144).
pub const WITNESS_FLAG: u32 = 1 << 30;

/// services (8) + IPv6-mapped address (16) + port (2), without timestamp.
pub const NET_ADDR_LEN: usize = 26;

/// Fixed part of a `version` body: everything except the user agent
/// (with its length prefix) and the optional relay byte.
pub const VERSION_FIXED_LEN: usize = 4 + 8 + 8 + NET_ADDR_LEN * 2 + 8 + 4;

/// Longest user agent accepted from a peer (`MAX_SUBVERSION_LENGTH`).
pub const MAX_USER_AGENT_LEN: usize = 256;

/// Number of chunks a spill may survive before it is reported as stuck.
pub const SPILL_WARN_ITERATIONS: u32 = 16;
