use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use rand::Rng;

use crate::config::SessionConfig;
use crate::wire::codec::{varint_len, write_varint};
use crate::wire::constants::{INV_ENTRY_LEN, NET_ADDR_LEN, VERSION_FIXED_LEN};
use crate::wire::message::{InvEntry, NetAddr, Payload, RejectMessage, VersionMessage};

/// Serialization of a message body.
///
/// `encoded_len` must agree exactly with the number of bytes `encode`
/// writes: frames are sized from it before any byte is produced.
pub trait Encode {
    fn encoded_len(&self) -> usize;

    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()>;
}

fn var_str_len(s: &[u8]) -> usize {
    varint_len(s.len() as u64) + s.len()
}

fn write_var_str<W: Write>(w: &mut W, s: &[u8]) -> io::Result<()> {
    write_varint(w, s.len() as u64)?;
    w.write_all(s)
}

impl Encode for NetAddr {
    fn encoded_len(&self) -> usize {
        NET_ADDR_LEN
    }

    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.services)?;
        w.write_all(&self.ip_bytes())?;
        w.write_u16::<BigEndian>(self.port)
    }
}

impl VersionMessage {
    /// Builds the `version` we open a connection with.
    ///
    /// Uses the current UNIX timestamp and a random nonce. Addresses we do
    /// not know are sent as `[::]:0`.
    pub fn build(config: &SessionConfig, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        let services = config.services.bits();
        let addr = |sa: Option<SocketAddr>| match sa {
            Some(sa) => NetAddr::new(services, sa),
            None => NetAddr::unspecified(services),
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        VersionMessage {
            version: config.protocol_version,
            services: config.services,
            timestamp,
            addr_recv: addr(remote),
            addr_from: addr(local),
            nonce: rand::thread_rng().r#gen(),
            user_agent: config.user_agent.clone(),
            start_height: config.start_height,
            relay: Some(true),
        }
    }
}

/// The payload layout is:
///
/// ```text
/// int32    version
/// uint64   services
/// int64    timestamp
/// net_addr addr_recv
/// net_addr addr_from
/// uint64   nonce
/// var_str  user_agent
/// int32    start_height
/// bool     relay          (optional)
/// ```
///
/// https://developer.bitcoin.org/reference/p2p_networking.html#version
impl Encode for VersionMessage {
    fn encoded_len(&self) -> usize {
        VERSION_FIXED_LEN + var_str_len(self.user_agent.as_bytes()) + usize::from(self.relay.is_some())
    }

    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.version)?;
        w.write_u64::<LittleEndian>(self.services.bits())?;
        w.write_i64::<LittleEndian>(self.timestamp)?;
        self.addr_recv.encode(w)?;
        self.addr_from.encode(w)?;
        w.write_u64::<LittleEndian>(self.nonce)?;
        write_var_str(w, self.user_agent.as_bytes())?;
        w.write_i32::<LittleEndian>(self.start_height)?;
        if let Some(relay) = self.relay {
            w.write_u8(u8::from(relay))?;
        }
        Ok(())
    }
}

impl Encode for [InvEntry] {
    fn encoded_len(&self) -> usize {
        varint_len(self.len() as u64) + self.len() * INV_ENTRY_LEN
    }

    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_varint(w, self.len() as u64)?;
        for entry in self {
            w.write_u32::<LittleEndian>(entry.inv_type.as_u32())?;
            w.write_all(&entry.hash)?;
        }
        Ok(())
    }
}

impl Encode for RejectMessage {
    fn encoded_len(&self) -> usize {
        var_str_len(self.message.name().as_bytes()) + 1 + var_str_len(self.reason.as_bytes()) + self.data.len()
    }

    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_var_str(w, self.message.name().as_bytes())?;
        w.write_u8(self.code.into())?;
        write_var_str(w, self.reason.as_bytes())?;
        w.write_all(&self.data)
    }
}

impl Encode for Payload {
    fn encoded_len(&self) -> usize {
        match self {
            Payload::Version(v) => v.encoded_len(),
            Payload::Verack => 0,
            Payload::Ping(nonce) | Payload::Pong(nonce) => nonce.map_or(0, |_| 8),
            Payload::Inv(entries) | Payload::GetData(entries) => entries.as_slice().encoded_len(),
            Payload::Tx(raw) => raw.len(),
            Payload::Reject(r) => r.encoded_len(),
            Payload::Unknown { data, .. } => data.len(),
        }
    }

    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Payload::Version(v) => v.encode(w),
            Payload::Verack => Ok(()),
            Payload::Ping(nonce) | Payload::Pong(nonce) => match nonce {
                Some(n) => w.write_u64::<LittleEndian>(*n),
                None => Ok(()),
            },
            Payload::Inv(entries) | Payload::GetData(entries) => entries.as_slice().encode(w),
            Payload::Tx(raw) => w.write_all(raw),
            Payload::Reject(r) => r.encode(w),
            Payload::Unknown { data, .. } => w.write_all(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::message::{Command, Decode, InvType, RejectCode, Services};
    use std::net::{IpAddr, Ipv4Addr};

    fn to_bytes<E: Encode + ?Sized>(value: &E) -> Vec<u8> {
        let mut out = vec![];
        value.encode(&mut out).unwrap();
        assert_eq!(out.len(), value.encoded_len());
        out
    }

    #[test]
    fn built_version_reflects_config() {
        let config = SessionConfig {
            start_height: 123,
            user_agent: "/test:0.1/".into(),
            ..SessionConfig::default()
        };
        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8333);

        let msg = VersionMessage::build(&config, None, Some(remote));
        assert_eq!(msg.version, 70016);
        assert_eq!(msg.services, Services::NODE_WITNESS);
        assert_eq!(msg.start_height, 123);
        assert_eq!(msg.relay, Some(true));
        assert_eq!(msg.addr_recv.socket_addr(), remote);
        assert_eq!(msg.addr_from.port, 0);
        assert!(msg.timestamp > 1_600_000_000);

        let bytes = to_bytes(&msg);
        // fixed fields, 1-byte length + 10 chars, start_height, relay
        assert_eq!(bytes.len(), 80 + 11 + 4 + 1);
        assert_eq!(&bytes[0..4], &70016i32.to_le_bytes());
        assert_eq!(*bytes.last().unwrap(), 1);
        assert_eq!(VersionMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn version_without_relay_omits_trailing_byte() {
        let mut msg = VersionMessage::build(&SessionConfig::default(), None, None);
        let with_relay = to_bytes(&msg).len();
        msg.relay = None;
        assert_eq!(to_bytes(&msg).len(), with_relay - 1);
    }

    #[test]
    fn net_addr_port_is_big_endian() {
        let addr = NetAddr::new(1, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 8333));
        let bytes = to_bytes(&addr);
        assert_eq!(bytes.len(), 26);
        assert_eq!(&bytes[24..], &[0x20, 0x8D]);
    }

    #[test]
    fn getdata_layout() {
        let payload = Payload::GetData(vec![InvEntry::new(InvType::WitnessTx, [0xAB; 32])]);
        let bytes = to_bytes(&payload);

        assert_eq!(bytes.len(), 1 + 36);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..5], &[0x01, 0x00, 0x00, 0x40]);
        assert_eq!(&bytes[5..], &[0xAB; 32]);
    }

    #[test]
    fn ping_without_nonce_is_empty() {
        assert!(to_bytes(&Payload::Ping(None)).is_empty());
        assert_eq!(to_bytes(&Payload::Pong(Some(9))), 9u64.to_le_bytes());
    }

    #[test]
    fn reject_layout() {
        let reject = RejectMessage {
            message: Command::Tx,
            code: RejectCode::Duplicate,
            reason: "txn-already-known".into(),
            data: vec![0x55; 32],
        };
        let bytes = to_bytes(&Payload::Reject(reject.clone()));

        assert_eq!(&bytes[..3], &[2, b't', b'x']);
        assert_eq!(bytes[3], 0x12);
        assert_eq!(bytes[4] as usize, "txn-already-known".len());
        assert_eq!(RejectMessage::decode(&bytes).unwrap(), reject);
    }
}
