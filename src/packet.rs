//! BOOTP/DHCPv4 wire codec (spec §4.B). Generalizes `edge-dhcp/src/lib.rs`'s
//! `Packet::decode`/`encode` and its `BytesIn`/`BytesOut` cursor helpers from
//! a fixed 11-option enum into a full-registry, `Vec<u8>`-backed codec.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use log::{trace, warn};

use crate::error::PacketError;
use crate::options::{self, OptionValue};
use crate::types::{Ipv4Address, MacAddress};

pub const COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
pub const FIXED_HEADER_LEN: usize = 236;
pub const MIN_PACKET_LEN: usize = FIXED_HEADER_LEN + COOKIE.len();
pub const MIN_ENCODED_LEN: usize = 300;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

const CHADDR_OFFSET: usize = 28;
const CHADDR_LEN: usize = 16;
const SNAME_OFFSET: usize = 44;
const SNAME_LEN: usize = 64;
const FILE_OFFSET: usize = 108;
const FILE_LEN: usize = 128;

const OVERLOAD_FILE: u8 = 0x1;
const OVERLOAD_SNAME: u8 = 0x2;

/// A decoded DHCPv4 packet. Fixed fields plus an ordered map from option
/// code to decoded value (spec §3's "mapping from option code (0-254) to a
/// decoded value"), the originating source address, and whether it arrived
/// on the PXE port.
#[derive(Debug, Clone)]
pub struct Packet {
    pub reply: bool,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub ciaddr: Ipv4Address,
    pub yiaddr: Ipv4Address,
    pub siaddr: Ipv4Address,
    pub giaddr: Ipv4Address,
    pub chaddr: [u8; CHADDR_LEN],
    pub options: BTreeMap<u8, OptionValue>,
    pub source: Option<SocketAddr>,
    pub pxe: bool,
}

impl Packet {
    pub fn mac(&self) -> Option<MacAddress> {
        MacAddress::from_chaddr(&self.chaddr[..self.hlen as usize])
    }

    pub fn message_type(&self) -> Option<u8> {
        self.options
            .get(&options::DHCP_MESSAGE_TYPE)
            .and_then(OptionValue::as_byte)
    }

    pub fn decode(data: &[u8], source: Option<SocketAddr>, pxe: bool) -> Result<Self, PacketError> {
        if data.len() < MIN_PACKET_LEN {
            return Err(PacketError::PacketTooShort(data.len()));
        }

        if data[FIXED_HEADER_LEN..MIN_PACKET_LEN] != COOKIE {
            return Err(PacketError::BadMagic);
        }

        let htype = data[1];
        if htype != 1 {
            return Err(PacketError::UnknownHardwareType(htype));
        }

        let hlen = data[2];
        if hlen as usize > CHADDR_LEN {
            return Err(PacketError::InvalidHardwareLength(hlen));
        }

        let mut chaddr = [0u8; CHADDR_LEN];
        chaddr.copy_from_slice(&data[CHADDR_OFFSET..CHADDR_OFFSET + CHADDR_LEN]);

        let mut raw: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        walk_options(&data[MIN_PACKET_LEN..], &mut raw)?;

        let overload = raw
            .get(&options::OVERLOAD)
            .and_then(|v| v.first().copied())
            .unwrap_or(0);

        if overload & OVERLOAD_FILE != 0 {
            walk_options(&data[FILE_OFFSET..FILE_OFFSET + FILE_LEN], &mut raw)?;
        }
        if overload & OVERLOAD_SNAME != 0 {
            walk_options(&data[SNAME_OFFSET..SNAME_OFFSET + SNAME_LEN], &mut raw)?;
        }

        let mut decoded = BTreeMap::new();
        for (code, bytes) in raw {
            match OptionValue::decode(code, &bytes) {
                Ok(value) => {
                    decoded.insert(code, value);
                }
                Err(err) => {
                    warn!("option {code} malformed ({err}); keeping raw bytes");
                    decoded.insert(code, OptionValue::Raw(bytes));
                }
            }
        }

        let flags = u16::from_be_bytes([data[10], data[11]]);

        Ok(Self {
            reply: data[0] == BOOTREPLY,
            htype,
            hlen,
            hops: data[3],
            xid: u32::from_be_bytes(data[4..8].try_into().unwrap()),
            secs: u16::from_be_bytes([data[8], data[9]]),
            broadcast: flags & 0x8000 != 0,
            ciaddr: Ipv4Address::from(<[u8; 4]>::try_from(&data[12..16]).unwrap()),
            yiaddr: Ipv4Address::from(<[u8; 4]>::try_from(&data[16..20]).unwrap()),
            siaddr: Ipv4Address::from(<[u8; 4]>::try_from(&data[20..24]).unwrap()),
            giaddr: Ipv4Address::from(<[u8; 4]>::try_from(&data[24..28]).unwrap()),
            chaddr,
            options: decoded,
            source,
            pxe,
        })
    }

    /// Emits the fixed header, magic cookie, options sorted by numeric code,
    /// option 255, then zero-pads to the BOOTP minimum length. Encoded
    /// payloads longer than 255 bytes are split into repeated TLV chunks
    /// sharing the same code.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_ENCODED_LEN);

        out.push(if self.reply { BOOTREPLY } else { BOOTREQUEST });
        out.push(self.htype);
        out.push(self.hlen);
        out.push(self.hops);
        out.extend_from_slice(&self.xid.to_be_bytes());
        out.extend_from_slice(&self.secs.to_be_bytes());
        out.extend_from_slice(&(if self.broadcast { 0x8000u16 } else { 0 }).to_be_bytes());
        out.extend_from_slice(&self.ciaddr.octets());
        out.extend_from_slice(&self.yiaddr.octets());
        out.extend_from_slice(&self.siaddr.octets());
        out.extend_from_slice(&self.giaddr.octets());
        out.extend_from_slice(&self.chaddr);
        out.extend_from_slice(&[0u8; SNAME_LEN]);
        out.extend_from_slice(&[0u8; FILE_LEN]);
        out.extend_from_slice(&COOKIE);

        for (code, value) in &self.options {
            let mut body = Vec::new();
            value.encode(&mut body);
            encode_tlv(&mut out, *code, &body);
        }

        out.push(options::END);

        while out.len() < MIN_ENCODED_LEN {
            out.push(options::PAD);
        }

        trace!("encoded {} byte packet, xid={:#x}", out.len(), self.xid);

        out
    }
}

fn encode_tlv(out: &mut Vec<u8>, code: u8, body: &[u8]) {
    if body.is_empty() {
        out.push(code);
        out.push(0);
        return;
    }

    for chunk in body.chunks(255) {
        out.push(code);
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
}

/// Walks one TLV options area, accumulating duplicate option codes by
/// concatenating their payloads (RFC 3396), per spec §3's invariant and
/// §9's Open Question resolution in `SPEC_FULL.md` §11.
fn walk_options(area: &[u8], raw: &mut BTreeMap<u8, Vec<u8>>) -> Result<(), PacketError> {
    let mut pos = 0;

    while pos < area.len() {
        let code = area[pos];
        pos += 1;

        if code == options::PAD {
            continue;
        }
        if code == options::END {
            break;
        }

        let len = *area.get(pos).ok_or(PacketError::TruncatedOption(code))? as usize;
        pos += 1;

        let body = area
            .get(pos..pos + len)
            .ok_or(PacketError::TruncatedOption(code))?;
        pos += len;

        raw.entry(code).or_default().extend_from_slice(body);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::OptionValue;

    fn sample_discover() -> Packet {
        let mut options = BTreeMap::new();
        options.insert(
            options::DHCP_MESSAGE_TYPE,
            OptionValue::Byte(1), // DISCOVER
        );
        options.insert(
            options::PARAMETER_REQUEST_LIST,
            OptionValue::Bytes(vec![1, 3, 6]),
        );

        Packet {
            reply: false,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0xDEADBEEF,
            secs: 0,
            broadcast: false,
            ciaddr: Ipv4Address::UNSPECIFIED,
            yiaddr: Ipv4Address::UNSPECIFIED,
            siaddr: Ipv4Address::UNSPECIFIED,
            giaddr: Ipv4Address::UNSPECIFIED,
            chaddr: {
                let mut c = [0u8; 16];
                c[..6].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
                c
            },
            options,
            source: None,
            pxe: false,
        }
    }

    #[test]
    fn round_trips_through_decode_encode() {
        let packet = sample_discover();
        let encoded = packet.encode();
        assert!(encoded.len() >= MIN_ENCODED_LEN);

        let decoded = Packet::decode(&encoded, None, false).unwrap();
        assert_eq!(decoded.xid, 0xDEADBEEF);
        assert_eq!(decoded.mac().unwrap().to_string(), "00:11:22:33:44:55");
        assert_eq!(decoded.message_type(), Some(1));
    }

    #[test]
    fn duplicate_option_codes_concatenate() {
        let mut data = vec![0u8; MIN_PACKET_LEN];
        data[0] = BOOTREQUEST;
        data[1] = 1;
        data[2] = 6;
        data[FIXED_HEADER_LEN..MIN_PACKET_LEN].copy_from_slice(&COOKIE);
        // Two fragments of option 12 (hostname): "foo" then "bar".
        data.extend_from_slice(&[12, 3, b'f', b'o', b'o']);
        data.extend_from_slice(&[12, 3, b'b', b'a', b'r']);
        data.push(options::END);

        let decoded = Packet::decode(&data, None, false).unwrap();
        assert_eq!(
            decoded.options.get(&options::HOST_NAME).and_then(OptionValue::as_text),
            Some("foobar")
        );
    }

    #[test]
    fn rejects_short_packets() {
        let err = Packet::decode(&[0u8; 10], None, false).unwrap_err();
        assert!(matches!(err, PacketError::PacketTooShort(10)));
    }

    #[test]
    fn rejects_bad_magic_cookie() {
        let mut data = vec![0u8; MIN_PACKET_LEN];
        data[1] = 1;
        let err = Packet::decode(&data, None, false).unwrap_err();
        assert!(matches!(err, PacketError::BadMagic));
    }

    #[test]
    fn rejects_hlen_over_chaddr_capacity() {
        let mut data = vec![0u8; MIN_PACKET_LEN];
        data[0] = BOOTREQUEST;
        data[1] = 1;
        data[2] = 17; // chaddr is only 16 bytes
        data[FIXED_HEADER_LEN..MIN_PACKET_LEN].copy_from_slice(&COOKIE);

        let err = Packet::decode(&data, None, false).unwrap_err();
        assert!(matches!(err, PacketError::InvalidHardwareLength(17)));
    }
}
