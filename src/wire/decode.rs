use crate::error::WireError;
use crate::wire::constants::{INV_ENTRY_LEN, INV_MAX, MAX_USER_AGENT_LEN};
use crate::wire::message::{
    Command, Decode, InvEntry, InvType, NetAddr, RejectCode, RejectMessage, Services,
    VersionMessage,
};
use crate::wire::reader::ByteReader;

impl Decode for VersionMessage {
    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(payload);

        let version = r.read_i32("version: version")?;
        let services = Services::from(r.read_u64("version: services")?);
        let timestamp = r.read_i64("version: timestamp")?;
        let addr_recv = decode_net_addr(&mut r)?;
        let addr_from = decode_net_addr(&mut r)?;
        let nonce = r.read_u64("version: nonce")?;

        let user_agent = std::str::from_utf8(
            r.read_var_bytes(MAX_USER_AGENT_LEN, "version: user_agent")?,
        )
        .map_err(|_| WireError::PayloadDecode("version: user_agent is not utf-8"))?
        .to_string();

        let start_height = r.read_i32("version: start_height")?;
        let relay = if r.is_empty() {
            None
        } else {
            Some(r.read_u8("version: relay")? != 0)
        };

        Ok(VersionMessage {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

impl Decode for RejectMessage {
    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(payload);

        let max = r.remaining();
        let name = String::from_utf8_lossy(r.read_var_bytes(max, "reject: message")?);
        let message =
            Command::from_name(&name).ok_or_else(|| WireError::UnknownRejectedType(name.to_string()))?;

        let code = RejectCode::from(r.read_u8("reject: ccode")?);

        let max = r.remaining();
        let reason = String::from_utf8_lossy(r.read_var_bytes(max, "reject: reason")?).into_owned();

        // Whatever is left is code-specific; keep it opaque.
        let data = r.rest().to_vec();

        Ok(RejectMessage {
            message,
            code,
            reason,
            data,
        })
    }
}

/// Decodes an `inv`/`getdata` entry list.
///
/// The announced count is checked against [`INV_MAX`] and against the bytes
/// actually present before anything is allocated. Base types 1..=3 may carry
/// the witness flag in both directions; unknown types reject the whole list.
pub(crate) fn decode_inventory(payload: &[u8]) -> Result<Vec<InvEntry>, WireError> {
    let mut r = ByteReader::new(payload);

    let count = r.read_varint()?;
    if count > INV_MAX as u64 {
        return Err(WireError::InventoryTooLarge {
            count,
            max: INV_MAX,
        });
    }

    let count = count as usize;
    if r.remaining() < count * INV_ENTRY_LEN {
        return Err(WireError::PayloadDecode("inv: fewer entries than announced"));
    }

    let mut entries = Vec::with_capacity(count);

    for _ in 0..count {
        let raw = r.read_u32("inv: type")?;
        let inv_type = InvType::from_u32(raw).ok_or(WireError::InvalidInventoryType(raw))?;
        let hash = r.read_array::<32>("inv: hash")?;

        entries.push(InvEntry { inv_type, hash });
    }

    Ok(entries)
}

/// Ping and pong bodies are either empty (no nonce) or a single u64.
pub(crate) fn decode_nonce(payload: &[u8], ctx: &'static str) -> Result<Option<u64>, WireError> {
    match payload.len() {
        0 => Ok(None),
        8 => ByteReader::new(payload).read_u64(ctx).map(Some),
        _ => Err(WireError::PayloadDecode(ctx)),
    }
}

pub(crate) fn decode_net_addr(r: &mut ByteReader<'_>) -> Result<NetAddr, WireError> {
    let services = r.read_u64("net_addr: services")?;
    let ip = r.read_array::<16>("net_addr: ip")?;
    let port = r.read_u16_be("net_addr: port")?;

    Ok(NetAddr::from_ip_bytes(services, ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::message::Payload;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    /// Encodes a single NetAddr field as used in version payloads,
    /// with the standard `::ffff:` IPv4 mapping.
    fn net_addr_bytes(services: u64, ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut b = vec![];
        b.extend_from_slice(&services.to_le_bytes());
        b.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);
        b.extend_from_slice(&ip);
        b.extend_from_slice(&port.to_be_bytes());
        b
    }

    /// Realistic version payload for protocol v70016 (/Satoshi:25.0.0/).
    /// services = NODE_NETWORK(1) | NODE_WITNESS(8) | NODE_NETWORK_LIMITED(1024) = 1033
    fn version_payload_v70016() -> Vec<u8> {
        let mut p = vec![];
        p.extend_from_slice(&70016i32.to_le_bytes());
        p.extend_from_slice(&1033u64.to_le_bytes());
        p.extend_from_slice(&1700000000i64.to_le_bytes());
        p.extend(net_addr_bytes(1033, [192, 168, 1, 1], 8333)); // addr_recv
        p.extend(net_addr_bytes(1033, [10, 0, 0, 1], 8333)); // addr_from
        p.extend_from_slice(&0x1234567890abcdefu64.to_le_bytes()); // nonce
        let ua = b"/Satoshi:25.0.0/";
        p.push(ua.len() as u8);
        p.extend_from_slice(ua);
        p.extend_from_slice(&820000i32.to_le_bytes()); // start_height (~late 2023)
        p.push(1); // relay = true
        p
    }

    fn inv_payload(entries: &[(u32, u8)]) -> Vec<u8> {
        let mut p = vec![entries.len() as u8];
        for (ty, fill) in entries {
            p.extend_from_slice(&ty.to_le_bytes());
            p.extend_from_slice(&[*fill; 32]);
        }
        p
    }

    #[test]
    fn decode_version_v70016_all_fields() {
        let msg = VersionMessage::decode(&version_payload_v70016()).unwrap();

        assert_eq!(msg.version, 70016);
        assert_eq!(msg.services.bits(), 1033);
        assert!(msg.services.contains(Services::NODE_WITNESS));
        assert_eq!(msg.timestamp, 1700000000);
        assert_eq!(msg.nonce, 0x1234567890abcdef);
        assert_eq!(msg.user_agent, "/Satoshi:25.0.0/");
        assert_eq!(msg.start_height, 820000);
        assert_eq!(msg.relay, Some(true));
        assert_eq!(msg.addr_recv.port, 8333);
        assert_eq!(msg.addr_recv.ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(msg.addr_from.ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn decode_version_relay_absent_when_byte_missing() {
        let mut payload = version_payload_v70016();
        payload.pop(); // remove relay byte
        let msg = VersionMessage::decode(&payload).unwrap();
        assert_eq!(msg.relay, None);
    }

    #[test]
    fn decode_version_truncated_payload_returns_error() {
        assert!(VersionMessage::decode(&[0u8; 10]).is_err());

        let mut payload = version_payload_v70016();
        payload.truncate(payload.len() - 3); // cut into start_height
        assert!(matches!(
            VersionMessage::decode(&payload),
            Err(WireError::PayloadDecode("version: start_height"))
        ));
    }

    #[test]
    fn decode_version_rejects_oversized_user_agent() {
        let mut p = version_payload_v70016();
        // rewrite: fixed part is 80 bytes, then the user agent
        p.truncate(80);
        p.extend_from_slice(&[0xFD, 0x01, 0x01]); // 257
        p.extend_from_slice(&[b'a'; 257]);
        p.extend_from_slice(&0i32.to_le_bytes());
        assert!(VersionMessage::decode(&p).is_err());
    }

    #[test]
    fn decode_net_addr_ipv6() {
        // 2001:db8::1: documentation prefix (RFC 3849)
        let ip: [u8; 16] = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let mut b = vec![];
        b.extend_from_slice(&8u64.to_le_bytes()); // NODE_WITNESS
        b.extend_from_slice(&ip);
        b.extend_from_slice(&8333u16.to_be_bytes());

        let addr = decode_net_addr(&mut ByteReader::new(&b)).unwrap();
        assert_eq!(addr.port, 8333);
        assert_eq!(addr.services, 8);
        assert_eq!(addr.ip, IpAddr::V6(Ipv6Addr::from(ip)));
    }

    #[test]
    fn decode_inv_preserves_order() {
        let entries = decode_inventory(&inv_payload(&[(1, 0xAA), (2, 0xBB), (1, 0xCC)])).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], InvEntry::tx([0xAA; 32]));
        assert_eq!(entries[1], InvEntry::block([0xBB; 32]));
        assert_eq!(entries[2], InvEntry::tx([0xCC; 32]));
    }

    #[test]
    fn decode_inv_empty_list() {
        assert!(decode_inventory(&[0x00]).unwrap().is_empty());
    }

    #[test]
    fn decode_inv_rejects_count_above_cap() {
        let mut payload = vec![0xFD];
        payload.extend_from_slice(&50_001u16.to_le_bytes());
        assert!(matches!(
            decode_inventory(&payload),
            Err(WireError::InventoryTooLarge { count: 50_001, max: 50_000 })
        ));
    }

    #[test]
    fn decode_inv_rejects_missing_entries() {
        let mut payload = inv_payload(&[(1, 0xAA), (1, 0xBB)]);
        payload.truncate(payload.len() - 5);
        assert!(decode_inventory(&payload).is_err());
    }

    #[test]
    fn witness_flagged_entries_accepted() {
        let payload = inv_payload(&[(1, 0x10), (0x4000_0001, 0x11), (2, 0x20), (0x4000_0002, 0x21)]);

        assert_eq!(
            decode_inventory(&payload).unwrap(),
            vec![
                InvEntry::tx([0x10; 32]),
                InvEntry::new(InvType::WitnessTx, [0x11; 32]),
                InvEntry::block([0x20; 32]),
                InvEntry::new(InvType::WitnessBlock, [0x21; 32]),
            ]
        );
    }

    #[test]
    fn witness_flag_on_unknown_base_rejected() {
        assert!(matches!(
            decode_inventory(&inv_payload(&[(0x4000_0004, 0)])),
            Err(WireError::InvalidInventoryType(0x4000_0004))
        ));
        assert!(matches!(
            decode_inventory(&inv_payload(&[(0x8000_0001, 0)])),
            Err(WireError::InvalidInventoryType(0x8000_0001))
        ));
    }

    #[test]
    fn unknown_inventory_type_rejected() {
        assert!(matches!(
            decode_inventory(&inv_payload(&[(4, 0)])),
            Err(WireError::InvalidInventoryType(4))
        ));
    }

    #[test]
    fn ping_nonce_lengths() {
        assert_eq!(decode_nonce(&[], "ping").unwrap(), None);
        assert_eq!(decode_nonce(&7u64.to_le_bytes(), "ping").unwrap(), Some(7));
        assert!(decode_nonce(&[1, 2, 3], "ping").is_err());
    }

    #[test]
    fn decode_reject_tx_with_hash() {
        let mut p = vec![2];
        p.extend_from_slice(b"tx");
        p.push(0x42);
        let reason = b"min relay fee not met";
        p.push(reason.len() as u8);
        p.extend_from_slice(reason);
        p.extend_from_slice(&[0x77; 32]);

        let reject = RejectMessage::decode(&p).unwrap();
        assert_eq!(reject.message, Command::Tx);
        assert_eq!(reject.code, RejectCode::InsufficientFee);
        assert_eq!(reject.reason, "min relay fee not met");
        assert_eq!(reject.data, vec![0x77; 32]);
    }

    #[test]
    fn decode_reject_without_extra_data() {
        let mut p = vec![7];
        p.extend_from_slice(b"version");
        p.push(0x11);
        p.push(0);

        let reject = RejectMessage::decode(&p).unwrap();
        assert_eq!(reject.message, Command::Version);
        assert_eq!(reject.code, RejectCode::Obsolete);
        assert!(reject.reason.is_empty());
        assert!(reject.data.is_empty());
    }

    #[test]
    fn decode_reject_unknown_type() {
        let mut p = vec![5];
        p.extend_from_slice(b"block");
        p.push(0x10);
        p.push(0);

        assert!(matches!(
            RejectMessage::decode(&p),
            Err(WireError::UnknownRejectedType(name)) if name == "block"
        ));
    }

    #[test]
    fn payload_decode_dispatches_on_command() {
        let Payload::Version(v) = Payload::decode("version", &version_payload_v70016()).unwrap() else {
            panic!("expected Payload::Version");
        };
        assert_eq!(v.version, 70016);

        assert_eq!(
            Payload::decode("tx", &[1, 2, 3]).unwrap(),
            Payload::Tx(vec![1, 2, 3])
        );
        assert_eq!(Payload::decode("pong", &[]).unwrap(), Payload::Pong(None));
    }
}
