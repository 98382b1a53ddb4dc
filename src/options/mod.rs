//! The option registry (spec §4.A): a compile-time table keyed by option
//! code, dispatching to a codec chosen by each entry's `TypeKind`.
//!
//! Generalizes `edge-dhcp/src/lib.rs`'s eleven-variant `DhcpOption` enum to
//! the full code space enumerated in
//! `original_source/.../dhcp_types/constants.py`'s `DHCP_OPTIONS_TYPES` /
//! `DHCP_OPTIONS` tables.

pub mod rfc;

use crate::error::PacketError;
use crate::types::Ipv4Address;

pub const PAD: u8 = 0;
pub const END: u8 = 255;

pub const SUBNET_MASK: u8 = 1;
pub const ROUTER: u8 = 3;
pub const DOMAIN_NAME_SERVER: u8 = 6;
pub const HOST_NAME: u8 = 12;
pub const DOMAIN_NAME: u8 = 15;
pub const BROADCAST_ADDRESS: u8 = 28;
pub const NTP_SERVERS: u8 = 42;
pub const REQUESTED_IP_ADDRESS: u8 = 50;
pub const IP_ADDRESS_LEASE_TIME: u8 = 51;
pub const OVERLOAD: u8 = 52;
pub const DHCP_MESSAGE_TYPE: u8 = 53;
pub const SERVER_IDENTIFIER: u8 = 54;
pub const PARAMETER_REQUEST_LIST: u8 = 55;
pub const MESSAGE: u8 = 56;
pub const RELAY_AGENT_INFORMATION: u8 = 82;

/// How an option's payload is validated and, for the basic (non-RFC) kinds,
/// how many bytes it spans. `spec.md` §4.A's literal variant list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Pad,
    End,
    Bool,
    Byte,
    Bytes { min_length: usize, multiple: usize },
    U16,
    U16Plus,
    U32,
    U32Plus,
    Ipv4,
    Ipv4Plus,
    Ipv4Mult,
    String,
    Identifier,
    Rfc2610_78,
    Rfc2610_79,
    Rfc3361_120,
    Rfc3397_119,
    Rfc3442_121,
    Rfc3925_124,
    Rfc3925_125,
    Rfc4174_83,
    Rfc4280_88,
    Rfc5223_137,
    Rfc5678_139,
    Rfc5678_140,
    Unassigned,
    Reserved,
}

impl TypeKind {
    /// Validates a raw payload length against `(fixed_length, min_length,
    /// multiple)`, per `DHCP_FIELDS_SPECS`'s pseudocode. RFC-specific kinds
    /// are validated by their own decoders instead and always pass here.
    pub fn validate_length(self, len: usize) -> bool {
        let (fixed, min, mult) = match self {
            TypeKind::Pad | TypeKind::End => (0, 0, 1),
            TypeKind::Bool | TypeKind::Byte => (1, 0, 1),
            TypeKind::Bytes {
                min_length,
                multiple,
            } => (0, min_length, multiple.max(1)),
            TypeKind::U16 => (2, 0, 1),
            TypeKind::U16Plus => (0, 2, 2),
            TypeKind::U32 => (4, 0, 1),
            TypeKind::U32Plus => (0, 4, 4),
            TypeKind::Ipv4 => (4, 0, 1),
            TypeKind::Ipv4Plus => (0, 4, 4),
            TypeKind::Ipv4Mult => (0, 0, 4),
            TypeKind::String => (0, 0, 1),
            TypeKind::Identifier => (0, 2, 1),
            TypeKind::Unassigned | TypeKind::Reserved => return true,
            _ => return true,
        };

        if fixed != 0 {
            len == fixed
        } else {
            len >= min && len % mult.max(1) == 0
        }
    }
}

/// Looks up the registry entry for an option code, per
/// `DHCP_OPTIONS_TYPES` (codes 224-254 default to `Reserved`, everything
/// else not listed defaults to `Unassigned`).
pub fn by_code(code: u8) -> TypeKind {
    use TypeKind::*;

    match code {
        0 => Pad,
        1 => Ipv4,
        2 => U32,
        3..=11 => Ipv4Plus,
        12 => String,
        13 => U16,
        14 | 15 => String,
        16 => Ipv4,
        17 | 18 => String,
        19 | 20 => Bool,
        21 => Ipv4Plus,
        22 => U16,
        23 => Byte,
        24 => U32,
        25 => U16Plus,
        26 => U16,
        27 => Bool,
        28 => Ipv4,
        29..=31 => Bool,
        32 => Ipv4,
        33 => Ipv4Plus,
        34 => Bool,
        35 => U32,
        36 => Bool,
        37 => Byte,
        38 => U32,
        39 => Bool,
        40 => String,
        41 | 42 => Ipv4Plus,
        43 => Bytes {
            min_length: 1,
            multiple: 1,
        },
        44 | 45 => Ipv4Plus,
        46 => Byte,
        47 => String,
        48 | 49 => Ipv4Plus,
        50 => Ipv4,
        51 => U32,
        52 => Byte,
        53 => Byte,
        54 => Ipv4,
        55 => Bytes {
            min_length: 1,
            multiple: 1,
        },
        56 => String,
        57 => U16,
        58 | 59 => U32,
        60 => String,
        61 => Identifier,
        62 => String,
        63 => Bytes {
            min_length: 1,
            multiple: 1,
        },
        64 => String,
        65 => Ipv4Plus,
        66 | 67 => String,
        68 => Ipv4Mult,
        69..=76 => Ipv4Plus,
        77 => String,
        78 => Rfc2610_78,
        79 => Rfc2610_79,
        80 => Bytes {
            min_length: 0,
            multiple: 1,
        },
        81 => String,
        82 => Bytes {
            min_length: 1,
            multiple: 1,
        },
        83 => Rfc4174_83,
        85 => Ipv4Plus,
        86 | 87 => Bytes {
            min_length: 1,
            multiple: 1,
        },
        88 => Rfc4280_88,
        89 => Ipv4Plus,
        90 => Unassigned, // RFC 3118 auth, not implemented (out of scope)
        91 => U32,
        92 => Ipv4Plus,
        93 => U16Plus,
        94 => Bytes {
            min_length: 1,
            multiple: 1,
        },
        95 => String,
        97 => Bytes {
            min_length: 1,
            multiple: 1,
        },
        98 => String,
        99 => Bytes {
            min_length: 1,
            multiple: 1,
        },
        100 | 101 => String,
        112..=114 => String,
        116 => Bool,
        117 => U16Plus,
        118 => Ipv4,
        119 => Rfc3397_119,
        120 => Rfc3361_120,
        121 => Rfc3442_121,
        122 => String,
        123 => Bytes {
            min_length: 1,
            multiple: 1,
        },
        124 => Rfc3925_124,
        125 => Rfc3925_125,
        128..=135 => String,
        136 => Ipv4Plus,
        137 => Rfc5223_137,
        138 => Ipv4Plus,
        139 => Rfc5678_139,
        140 => Rfc5678_140,
        175 => String,
        208 => U32,
        209 | 210 => String,
        211 => U32,
        224..=254 => Reserved,
        255 => End,
        _ => Unassigned,
    }
}

/// `(name, code)` pairs, transcribed from `DHCP_OPTIONS` /
/// `DHCP_OPTIONS_REVERSE`. A linear scan is fine: this runs at config-parse
/// time, not per packet.
const NAMES: &[(&str, u8)] = &[
    ("subnet_mask", 1),
    ("time_offset", 2),
    ("router", 3),
    ("time_server", 4),
    ("name_server", 5),
    ("domain_name_servers", 6),
    ("log_server", 7),
    ("cookie_server", 8),
    ("lpr_server", 9),
    ("impress_server", 10),
    ("resource_location_server", 11),
    ("hostname", 12),
    ("bootfile", 13),
    ("merit_dump_file", 14),
    ("domain_name", 15),
    ("swap_server", 16),
    ("root_path", 17),
    ("extensions_path", 18),
    ("ip_forwarding", 19),
    ("nonlocal_source_routing", 20),
    ("policy_filter", 21),
    ("maximum_datagram_reassembly_size", 22),
    ("default_ip_time-to-live", 23),
    ("path_mtu_aging_timeout", 24),
    ("path_mtu_table", 25),
    ("interface_mtu", 26),
    ("all_subnets_are_local", 27),
    ("broadcast_address", 28),
    ("perform_mask_discovery", 29),
    ("mask_supplier", 30),
    ("perform_router_discovery", 31),
    ("router_solicitation_address", 32),
    ("static_routes", 33),
    ("trailer_encapsulation", 34),
    ("arp_cache_timeout", 35),
    ("ethernet_encapsulation", 36),
    ("tcp_default_ttl", 37),
    ("tcp_keepalive_interval", 38),
    ("tcp_keepalive_garbage", 39),
    ("nis_domain", 40),
    ("nis_servers", 41),
    ("ntp_servers", 42),
    ("vendor_specific_information", 43),
    ("nbns", 44),
    ("nbdd", 45),
    ("nb_node_type", 46),
    ("nb_scope", 47),
    ("x_window_system_font_server", 48),
    ("x_window_system_display_manager", 49),
    ("requested_ip_address", 50),
    ("ip_address_lease_time", 51),
    ("overload", 52),
    ("dhcp_message_type", 53),
    ("server_identifier", 54),
    ("parameter_request_list", 55),
    ("message", 56),
    ("maximum_dhcp_message_size", 57),
    ("renewal_time_value", 58),
    ("rebinding_time_value", 59),
    ("vendor_class_identifier", 60),
    ("client_identifier", 61),
    ("netware_ip_domain_name", 62),
    ("netware_ip_sub_options", 63),
    ("nis+_domain", 64),
    ("nis+_servers", 65),
    ("tftp_server_name", 66),
    ("bootfile_name", 67),
    ("mobile_ip_home_agent", 68),
    ("smtp_servers", 69),
    ("pop_servers", 70),
    ("nntp_servers", 71),
    ("default_www_server", 72),
    ("default_finger_server", 73),
    ("default_irc_server", 74),
    ("streettalk_server", 75),
    ("streettalk_directory_assistance_server", 76),
    ("user_class", 77),
    ("directory_agent", 78),
    ("service_scope", 79),
    ("rapid_commit", 80),
    ("client_fqdn", 81),
    ("relay_agent", 82),
    ("internet_storage_name_service", 83),
    ("nds_server", 85),
    ("nds_tree_name", 86),
    ("nds_context", 87),
    ("bcmcs_domain_list", 88),
    ("bcmcs_ipv4_list", 89),
    ("authentication", 90),
    ("client_last_transaction_time", 91),
    ("associated_ip", 92),
    ("client_system", 93),
    ("client_ndi", 94),
    ("ldap", 95),
    ("uuid_guid", 97),
    ("open_group_user_auth", 98),
    ("geoconf_civic", 99),
    ("pcode", 100),
    ("tcode", 101),
    ("netinfo_address", 112),
    ("netinfo_tag", 113),
    ("url", 114),
    ("auto_config", 116),
    ("name_service_search", 117),
    ("subnet_selection", 118),
    ("domain_search", 119),
    ("sip_servers", 120),
    ("classless_static_route", 121),
    ("cablelabs_client_configuration", 122),
    ("geoconf", 123),
    ("vendor_class", 124),
    ("vendor_specific", 125),
    ("pxe_128", 128),
    ("pxe_129", 129),
    ("pxe_130", 130),
    ("pxe_131", 131),
    ("pxe_132", 132),
    ("pxe_133", 133),
    ("pxe_134", 134),
    ("pxe_135", 135),
    ("pana_agent", 136),
    ("v4_lost", 137),
    ("capwap_ac_v4", 138),
    ("ipv4_mos", 139),
    ("fqdn_mos", 140),
    ("ipxe_test", 175),
    ("pxelinux_magic", 208),
    ("configuration_file", 209),
    ("path_prefix", 210),
    ("reboot_time", 211),
];

pub fn name_by_code(code: u8) -> Option<&'static str> {
    NAMES.iter().find(|(_, c)| *c == code).map(|(n, _)| *n)
}

pub fn code_by_name(name: &str) -> Option<u8> {
    NAMES.iter().find(|(n, _)| *n == name).map(|(_, c)| *c)
}

/// A decoded option value. One-to-one with `TypeKind` (spec §9's "tagged
/// union whose variants correspond one-to-one with `TypeKind`"); decoders
/// and encoders are total functions on variants. Options the registry has
/// no typed decoder for are kept as `Raw` rather than failing (spec §4.B
/// step 5).
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Byte(u8),
    Bytes(Vec<u8>),
    U16(u16),
    U16List(Vec<u16>),
    U32(u32),
    U32List(Vec<u32>),
    Ipv4(Ipv4Address),
    Ipv4List(Vec<Ipv4Address>),
    Text(String),
    Identifier(Vec<u8>),
    DomainSearch(Vec<String>),
    SipServers(rfc::SipServers),
    ClasslessRoutes(Vec<rfc::ClasslessRoute>),
    VendorClasses(Vec<rfc::VendorClassEntry>),
    VendorSpecific(Vec<rfc::VendorSpecificEntry>),
    Isns(rfc::IsnsRecord),
    MandatoryIpv4List(rfc::MandatoryIpv4List),
    MandatoryScope(rfc::MandatoryScope),
    RelayAgentInformation(Vec<(u8, Vec<u8>)>),
    SubOptIpv4(Vec<(u8, Vec<Ipv4Address>)>),
    SubOptDomain(Vec<(u8, Vec<String>)>),
    Raw(Vec<u8>),
}

impl OptionValue {
    pub fn decode(code: u8, data: &[u8]) -> Result<Self, PacketError> {
        let kind = by_code(code);

        if !matches!(kind, TypeKind::Unassigned | TypeKind::Reserved)
            && code != RELAY_AGENT_INFORMATION
            && !kind.validate_length(data.len())
        {
            return Err(PacketError::InvalidOptionLength {
                code,
                got: data.len(),
                expected: "registry-defined length",
            });
        }

        Ok(match kind {
            TypeKind::Bool => OptionValue::Bool(data[0] != 0),
            TypeKind::Byte => OptionValue::Byte(data[0]),
            TypeKind::Bytes { .. } if code == RELAY_AGENT_INFORMATION => {
                OptionValue::RelayAgentInformation(rfc::decode_suboptions(data, code)?)
            }
            TypeKind::Bytes { .. } => OptionValue::Bytes(data.to_vec()),
            TypeKind::U16 => OptionValue::U16(u16::from_be_bytes(
                data.try_into().map_err(|_| PacketError::TruncatedOption(code))?,
            )),
            TypeKind::U16Plus => OptionValue::U16List(
                data.chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect(),
            ),
            TypeKind::U32 => OptionValue::U32(u32::from_be_bytes(
                data.try_into().map_err(|_| PacketError::TruncatedOption(code))?,
            )),
            TypeKind::U32Plus => OptionValue::U32List(
                data.chunks_exact(4)
                    .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            TypeKind::Ipv4 => OptionValue::Ipv4(Ipv4Address::from(
                <[u8; 4]>::try_from(data).map_err(|_| PacketError::TruncatedOption(code))?,
            )),
            TypeKind::Ipv4Plus | TypeKind::Ipv4Mult => OptionValue::Ipv4List(
                data.chunks_exact(4)
                    .map(|c| Ipv4Address::from([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            TypeKind::String => {
                OptionValue::Text(String::from_utf8_lossy(data).into_owned())
            }
            TypeKind::Identifier => OptionValue::Identifier(data.to_vec()),
            TypeKind::Rfc2610_78 => {
                OptionValue::MandatoryIpv4List(rfc::decode_mandatory_ipv4_list(data)?)
            }
            TypeKind::Rfc2610_79 => OptionValue::MandatoryScope(rfc::decode_mandatory_scope(data)?),
            TypeKind::Rfc3361_120 => OptionValue::SipServers(rfc::decode_sip_servers(data)?),
            TypeKind::Rfc3397_119 => OptionValue::DomainSearch(rfc::decode_domain_search(data)?),
            TypeKind::Rfc3442_121 => {
                OptionValue::ClasslessRoutes(rfc::decode_classless_routes(data)?)
            }
            TypeKind::Rfc3925_124 => OptionValue::VendorClasses(rfc::decode_vendor_classes(data)?),
            TypeKind::Rfc3925_125 => {
                OptionValue::VendorSpecific(rfc::decode_vendor_specific(data)?)
            }
            TypeKind::Rfc4174_83 => OptionValue::Isns(rfc::decode_isns(data)?),
            TypeKind::Rfc4280_88 => OptionValue::DomainSearch(rfc::decode_bcmcs_domains(data)?),
            TypeKind::Rfc5223_137 => OptionValue::DomainSearch(rfc::decode_lost_servers(data)?),
            TypeKind::Rfc5678_139 => {
                OptionValue::SubOptIpv4(rfc::decode_suboption_ipv4_list(data)?)
            }
            TypeKind::Rfc5678_140 => {
                OptionValue::SubOptDomain(rfc::decode_suboption_domain_list(data)?)
            }
            TypeKind::Pad | TypeKind::End | TypeKind::Unassigned | TypeKind::Reserved => {
                OptionValue::Raw(data.to_vec())
            }
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            OptionValue::Bool(b) => out.push(*b as u8),
            OptionValue::Byte(b) => out.push(*b),
            OptionValue::Bytes(bytes) => out.extend_from_slice(bytes),
            OptionValue::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
            OptionValue::U16List(vs) => {
                for v in vs {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            OptionValue::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
            OptionValue::U32List(vs) => {
                for v in vs {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            OptionValue::Ipv4(addr) => out.extend_from_slice(&addr.octets()),
            OptionValue::Ipv4List(addrs) => {
                for addr in addrs {
                    out.extend_from_slice(&addr.octets());
                }
            }
            OptionValue::Text(s) => out.extend_from_slice(s.as_bytes()),
            OptionValue::Identifier(bytes) => out.extend_from_slice(bytes),
            OptionValue::DomainSearch(domains) => rfc::encode_domain_search(out, domains),
            OptionValue::SipServers(servers) => rfc::encode_sip_servers(out, servers),
            OptionValue::ClasslessRoutes(routes) => rfc::encode_classless_routes(out, routes),
            OptionValue::VendorClasses(entries) => rfc::encode_vendor_classes(out, entries),
            OptionValue::VendorSpecific(entries) => rfc::encode_vendor_specific(out, entries),
            OptionValue::Isns(record) => rfc::encode_isns(out, record),
            OptionValue::MandatoryIpv4List(value) => rfc::encode_mandatory_ipv4_list(out, value),
            OptionValue::MandatoryScope(value) => rfc::encode_mandatory_scope(out, value),
            OptionValue::RelayAgentInformation(entries) => rfc::encode_suboptions(out, entries),
            OptionValue::SubOptIpv4(entries) => rfc::encode_suboption_ipv4_list(out, entries),
            OptionValue::SubOptDomain(entries) => rfc::encode_suboption_domain_list(out, entries),
            OptionValue::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            OptionValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Address> {
        match self {
            OptionValue::Ipv4(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ipv4_list(&self) -> Option<&[Ipv4Address]> {
        match self {
            OptionValue::Ipv4List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> Option<u8> {
        match self {
            OptionValue::Byte(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            OptionValue::Bytes(v) | OptionValue::Raw(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            OptionValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_lookup_round_trips() {
        assert_eq!(code_by_name("dhcp_message_type"), Some(DHCP_MESSAGE_TYPE));
        assert_eq!(name_by_code(DHCP_MESSAGE_TYPE), Some("dhcp_message_type"));
    }

    #[test]
    fn unknown_code_round_trips_as_raw() {
        let value = OptionValue::decode(200, &[1, 2, 3]).unwrap();
        assert!(matches!(value, OptionValue::Raw(_)));
        let mut out = Vec::new();
        value.encode(&mut out);
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn relay_agent_information_round_trips_sub_options() {
        let value = OptionValue::RelayAgentInformation(vec![
            (1, b"eth0".to_vec()),
            (2, b"switch-7".to_vec()),
        ]);
        let mut encoded = Vec::new();
        value.encode(&mut encoded);

        let decoded = OptionValue::decode(RELAY_AGENT_INFORMATION, &encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn fixed_length_mismatch_is_rejected() {
        let err = OptionValue::decode(SUBNET_MASK, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, PacketError::InvalidOptionLength { code, .. } if code == SUBNET_MASK));
    }
}
