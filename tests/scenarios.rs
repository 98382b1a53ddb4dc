//! Integration-level coverage of the six literal request/response scenarios
//! from the repository's design notes: DISCOVER/OFFER on a known MAC,
//! REQUEST/SELECTING with a mismatched server id, an unknown MAC under
//! non-authoritative policy, a misbehaving client tripping the rate limiter,
//! relay acceptance, and an option-82 round trip through the full packet
//! codec (not just the option codec in isolation).

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use static_dhcpd::config::Config;
use static_dhcpd::directory::{LeaseDefinition, StaticDirectory, SubnetKey};
use static_dhcpd::options::{self, OptionValue};
use static_dhcpd::packet::Packet;
use static_dhcpd::pipeline::{NoopHooks, Outcome, Pipeline};
use static_dhcpd::{Ipv4Address, MacAddress};

const SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
const CLIENT_MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

fn base_packet(message_type: u8, xid: u32, mac: [u8; 6]) -> Packet {
    let mut options = BTreeMap::new();
    options.insert(options::DHCP_MESSAGE_TYPE, OptionValue::Byte(message_type));
    let mut chaddr = [0u8; 16];
    chaddr[..6].copy_from_slice(&mac);

    Packet {
        reply: false,
        htype: 1,
        hlen: 6,
        hops: 0,
        xid,
        secs: 0,
        broadcast: true,
        ciaddr: Ipv4Address::UNSPECIFIED,
        yiaddr: Ipv4Address::UNSPECIFIED,
        siaddr: Ipv4Address::UNSPECIFIED,
        giaddr: Ipv4Address::UNSPECIFIED,
        chaddr,
        options,
        source: None,
        pxe: false,
    }
}

fn known_lease() -> LeaseDefinition {
    LeaseDefinition {
        ip: Ipv4Address::new(192, 168, 0, 100),
        lease_time_seconds: 3600,
        subnet_key: SubnetKey {
            subnet_id: "lan".into(),
            serial: 0,
        },
        hostname: None,
        gateways: vec![Ipv4Address::new(192, 168, 0, 1)],
        subnet_mask: Some(Ipv4Address::new(255, 255, 255, 0)),
        broadcast_address: None,
        domain_name: None,
        domain_name_servers: vec![Ipv4Address::new(8, 8, 8, 8)],
        ntp_servers: vec![],
        extra: HashMap::new(),
    }
}

fn pipeline_with_known_lease(config: Config) -> Pipeline {
    let mut backend = StaticDirectory::new();
    backend.insert(MacAddress::new(CLIENT_MAC), known_lease());
    Pipeline::new(config, Box::new(backend), Box::new(NoopHooks))
}

#[test]
fn scenario_1_discover_offer_known_mac_local() {
    let pipeline = pipeline_with_known_lease(Config::with_server_ip(SERVER_IP.into()));
    let request = base_packet(1, 0xDEADBEEF, CLIENT_MAC);

    let Outcome::Reply { packet, destination } = pipeline.handle(request, Instant::now()) else {
        panic!("expected an OFFER");
    };

    assert_eq!(packet.yiaddr, Ipv4Address::new(192, 168, 0, 100));
    assert_eq!(packet.siaddr, Ipv4Address::new(192, 168, 0, 1));
    assert_eq!(packet.xid, 0xDEADBEEF);
    assert_eq!(packet.options.get(&options::DHCP_MESSAGE_TYPE).and_then(OptionValue::as_byte), Some(2));
    assert_eq!(packet.options.get(&options::SERVER_IDENTIFIER).and_then(OptionValue::as_ipv4), Some(Ipv4Address::new(192, 168, 0, 1)));
    assert_eq!(packet.options.get(&options::IP_ADDRESS_LEASE_TIME).and_then(OptionValue::as_u32), Some(3600));
    assert_eq!(packet.options.get(&options::SUBNET_MASK).and_then(OptionValue::as_ipv4), Some(Ipv4Address::new(255, 255, 255, 0)));
    assert_eq!(packet.options.get(&options::ROUTER).and_then(OptionValue::as_ipv4_list), Some(&[Ipv4Address::new(192, 168, 0, 1)][..]));
    assert_eq!(packet.options.get(&options::DOMAIN_NAME_SERVER).and_then(OptionValue::as_ipv4_list), Some(&[Ipv4Address::new(8, 8, 8, 8)][..]));

    let encoded = packet.encode();
    assert!(encoded.len() >= 300);
    assert_eq!(&encoded[236..240], &[0x63, 0x82, 0x53, 0x63]);

    assert_eq!(destination.addr, "255.255.255.255:68".parse().unwrap());
}

#[test]
fn scenario_2_request_selecting_wrong_server_id_is_silent() {
    let pipeline = pipeline_with_known_lease(Config::with_server_ip(SERVER_IP.into()));
    let mut request = base_packet(3, 1, CLIENT_MAC);
    request.options.insert(
        options::SERVER_IDENTIFIER,
        OptionValue::Ipv4(Ipv4Address::new(10, 0, 0, 1)),
    );
    request.options.insert(
        options::REQUESTED_IP_ADDRESS,
        OptionValue::Ipv4(Ipv4Address::new(192, 168, 0, 100)),
    );

    match pipeline.handle(request, Instant::now()) {
        Outcome::NoReply => {}
        _ => panic!("expected no reply for a mismatched server identifier"),
    }
}

#[test]
fn scenario_3_unknown_mac_under_non_authoritative_policy_stays_silent() {
    let config = Config::with_server_ip(SERVER_IP.into());
    assert!(!config.authoritative);
    let pipeline = Pipeline::new(config, Box::new(StaticDirectory::new()), Box::new(NoopHooks));

    let now = Instant::now();
    for (offset, xid) in [(0u64, 1u32), (10, 2), (30, 3)] {
        match pipeline.handle(base_packet(1, xid, CLIENT_MAC), now + Duration::from_secs(offset)) {
            Outcome::Dropped => {}
            _ => panic!("expected every DISCOVER from an unknown MAC to be dropped"),
        }
    }
}

#[test]
fn scenario_4_misbehaving_client_trips_rate_limiter() {
    let pipeline = pipeline_with_known_lease(Config::with_server_ip(SERVER_IP.into()));
    let now = Instant::now();

    let mut replies = 0;
    for xid in 0..11u32 {
        if matches!(pipeline.handle(base_packet(1, xid, CLIENT_MAC), now), Outcome::Reply { .. }) {
            replies += 1;
        }
    }
    assert_eq!(replies, 10, "10th packet should still be admitted, 11th should not");

    match pipeline.handle(base_packet(1, 11, CLIENT_MAC), now + Duration::from_secs(100)) {
        Outcome::Dropped => {}
        _ => panic!("cooldown should still be in effect 100s later"),
    }

    match pipeline.handle(base_packet(1, 12, CLIENT_MAC), now + Duration::from_secs(200)) {
        Outcome::Reply { .. } => {}
        _ => panic!("cooldown (150s) plus polling interval should have elapsed by 200s"),
    }
}

#[test]
fn scenario_5_relay_unicast_reply() {
    let mut config = Config::with_server_ip(SERVER_IP.into());
    config.allow_dhcp_relays = true;
    config.allowed_dhcp_relays = vec![Ipv4Address::new(10, 0, 0, 1)];

    let pipeline = pipeline_with_known_lease(config);
    let mut request = base_packet(1, 1, CLIENT_MAC);
    request.giaddr = Ipv4Address::new(10, 0, 0, 1);
    request.broadcast = false;

    let Outcome::Reply { packet, destination } = pipeline.handle(request, Instant::now()) else {
        panic!("expected a relayed OFFER");
    };

    assert!(packet.reply);
    assert_eq!(destination.addr, "10.0.0.1:67".parse().unwrap());
    assert_eq!(destination.source_port, 67);
}

#[test]
fn scenario_6_option_82_round_trips_through_full_packet_codec() {
    let mut options = BTreeMap::new();
    options.insert(options::DHCP_MESSAGE_TYPE, OptionValue::Byte(1));
    options.insert(
        options::RELAY_AGENT_INFORMATION,
        OptionValue::RelayAgentInformation(vec![(1, b"eth0".to_vec()), (2, b"switch-7".to_vec())]),
    );

    let packet = Packet {
        reply: false,
        htype: 1,
        hlen: 6,
        hops: 0,
        xid: 7,
        secs: 0,
        broadcast: false,
        ciaddr: Ipv4Address::UNSPECIFIED,
        yiaddr: Ipv4Address::UNSPECIFIED,
        siaddr: Ipv4Address::UNSPECIFIED,
        giaddr: Ipv4Address::UNSPECIFIED,
        chaddr: {
            let mut c = [0u8; 16];
            c[..6].copy_from_slice(&CLIENT_MAC);
            c
        },
        options,
        source: None,
        pxe: false,
    };

    let encoded = packet.encode();
    let decoded = Packet::decode(&encoded, None, false).unwrap();

    assert_eq!(
        decoded.options.get(&options::RELAY_AGENT_INFORMATION),
        packet.options.get(&options::RELAY_AGENT_INFORMATION)
    );

    let re_encoded = decoded.encode();
    assert_eq!(encoded, re_encoded);
}
