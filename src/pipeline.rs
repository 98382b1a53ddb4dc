//! Request Classifier & Pipeline (spec §4.G). Generalizes
//! `edge-dhcp/src/server.rs`'s `Action`/`ServerOptions`/`Server` split
//! ("classify into an `Action`, then apply it") from four actions over a
//! fixed lease table into the full spec §4.G method set over a
//! directory-backed, cache-fronted, rate-limited server.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use crate::config::Config;
use crate::directory::{Directory, LeaseDefinition};
use crate::error::{DirectoryError, HookError, ReinitFailure};
use crate::options::{self, OptionValue};
use crate::packet::Packet;
use crate::ratelimit::RateLimiter;
use crate::stats::{ReinitBus, Statistics, StatisticsBus, TickBus};
use crate::types::{Ipv4Address, MacAddress};

/// The classified DHCP method (option 53), plus the REQUEST sub-mode table
/// of spec §4.G.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Discover,
    Request(RequestMode),
    Decline,
    Release,
    Inform,
    LeaseQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Selecting,
    InitReboot,
    Renewing,
    Rebinding,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::Discover => "DISCOVER",
            Method::Request(RequestMode::Selecting) => "REQUEST/SELECTING",
            Method::Request(RequestMode::InitReboot) => "REQUEST/INIT-REBOOT",
            Method::Request(RequestMode::Renewing) => "REQUEST/RENEWING",
            Method::Request(RequestMode::Rebinding) => "REQUEST/REBINDING",
            Method::Decline => "DECLINE",
            Method::Release => "RELEASE",
            Method::Inform => "INFORM",
            Method::LeaseQuery => "LEASEQUERY",
        }
    }
}

/// Classifies a decoded packet, per spec §4.G's option-53 table and the
/// REQUEST sub-mode discriminator table.
pub fn classify(packet: &Packet) -> Option<Method> {
    match packet.message_type()? {
        1 => Some(Method::Discover),
        3 => Some(classify_request(packet)),
        4 => Some(Method::Decline),
        7 => Some(Method::Release),
        8 => Some(Method::Inform),
        10 => Some(Method::LeaseQuery),
        _ => None,
    }
}

fn classify_request(packet: &Packet) -> Method {
    let server_id_set = packet.options.contains_key(&options::SERVER_IDENTIFIER);
    let ciaddr_set = !packet.ciaddr.is_unspecified();
    let requested_ip_set = packet
        .options
        .contains_key(&options::REQUESTED_IP_ADDRESS);

    let mode = if server_id_set && !ciaddr_set && requested_ip_set {
        RequestMode::Selecting
    } else if !server_id_set && !ciaddr_set && requested_ip_set {
        RequestMode::InitReboot
    } else if !server_id_set && ciaddr_set && !requested_ip_set {
        // RENEWING vs. REBINDING is properly discriminated by unicast vs.
        // broadcast destination at the link layer; approximated here, per
        // spec §4.G, by relay presence.
        if packet.giaddr.is_unspecified() {
            RequestMode::Renewing
        } else {
            RequestMode::Rebinding
        }
    } else {
        RequestMode::Selecting
    };

    Method::Request(mode)
}

/// What the pipeline decided to do with an inbound packet.
pub enum Outcome {
    Reply {
        packet: Packet,
        destination: Destination,
    },
    NoReply,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub addr: SocketAddr,
    pub source_port: u16,
}

/// Optional user hooks (spec §9: typed callback interfaces, not scripts).
pub trait Hooks: Send + Sync {
    /// May mutate the about-to-be-sent reply's options, or veto
    /// transmission by returning `Ok(false)`.
    fn load_dhcp_packet(&self, _reply: &mut Packet, _mac: MacAddress) -> Result<bool, HookError> {
        Ok(true)
    }

    /// May synthesise a `LeaseDefinition` for a MAC the directory does not
    /// recognise.
    fn handle_unknown_mac(&self, _mac: MacAddress) -> Result<Option<LeaseDefinition>, HookError> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct NoopHooks;
impl Hooks for NoopHooks {}

pub struct Pipeline {
    pub config: Config,
    pub directory: Arc<dyn Directory>,
    pub rate_limiter: Arc<RateLimiter>,
    pub stats: StatisticsBus,
    pub hooks: Arc<dyn Hooks>,
    tick_bus: TickBus,
    reinit_bus: ReinitBus,
}

impl Pipeline {
    pub fn new(
        config: Config,
        directory: Box<dyn Directory>,
        hooks: Box<dyn Hooks>,
    ) -> Self {
        let directory: Arc<dyn Directory> = Arc::from(directory);
        let hooks: Arc<dyn Hooks> = Arc::from(hooks);
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limiter_config()));

        let tick_bus = TickBus::new();
        let rate_limiter_for_tick = rate_limiter.clone();
        tick_bus.subscribe(move |now| rate_limiter_for_tick.purge_expired(now));

        let reinit_bus = ReinitBus::new();
        let directory_for_reinit = directory.clone();
        reinit_bus.subscribe(move || directory_for_reinit.reinitialise().map_err(|err| err.to_string()));

        Self {
            config,
            directory,
            rate_limiter,
            stats: StatisticsBus::new(),
            hooks,
            tick_bus,
            reinit_bus,
        }
    }

    pub fn handle(&self, request: Packet, now: Instant) -> Outcome {
        let started = Instant::now();
        let mac = request.mac();
        let method = classify(&request);

        let outcome = self.handle_inner(&request, method, mac, now);

        self.stats.emit(&Statistics {
            source_address: request.source,
            mac,
            ip: None,
            subnet_id: None,
            serial: None,
            method: method.map(Method::name),
            processing_time: started.elapsed(),
            processed: matches!(outcome, Outcome::Reply { .. }),
            pxe: request.pxe,
        });

        outcome
    }

    fn handle_inner(
        &self,
        request: &Packet,
        method: Option<Method>,
        mac: Option<MacAddress>,
        now: Instant,
    ) -> Outcome {
        let Some(method) = method else {
            return Outcome::Dropped;
        };
        let Some(mac) = mac else {
            return Outcome::Dropped;
        };

        if !self.config.allow_local_dhcp && request.giaddr.is_unspecified() {
            return Outcome::Dropped;
        }
        if !self.config.allow_dhcp_relays && !request.giaddr.is_unspecified() {
            return Outcome::Dropped;
        }
        if !self.config.allowed_dhcp_relays.is_empty()
            && !request.giaddr.is_unspecified()
            && !self.config.allowed_dhcp_relays.contains(&request.giaddr)
        {
            return Outcome::Dropped;
        }

        if !self.rate_limiter.admit(mac, now) {
            return Outcome::Dropped;
        }

        let lease = match self.resolve(mac, request.giaddr, now) {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                return if self.config.authoritative {
                    self.nak(request)
                } else {
                    Outcome::Dropped
                };
            }
            Err(err) => {
                warn!("directory lookup failed for {mac}: {err}");
                return Outcome::Dropped;
            }
        };

        let reply = match method {
            Method::Discover => self.offer(request, &lease),
            Method::Request(RequestMode::Selecting) => self.ack_selecting(request, &lease),
            Method::Request(RequestMode::InitReboot) => self.ack_init_reboot(request, &lease),
            Method::Request(RequestMode::Renewing)
            | Method::Request(RequestMode::Rebinding) => self.ack_renew(request, &lease),
            Method::Inform => Some(self.inform_ack(request, &lease)),
            Method::Decline => {
                warn!("DECLINE from {mac}: duplicate IPv4 assignment for {}", lease.ip);
                None
            }
            Method::Release => {
                info!("RELEASE from {mac}");
                None
            }
            Method::LeaseQuery => Some(self.lease_query_reply(request, Some(&lease))),
        };

        let Some(mut reply) = reply else {
            return Outcome::NoReply;
        };

        match self.hooks.load_dhcp_packet(&mut reply, mac) {
            Ok(true) => {}
            Ok(false) => return Outcome::NoReply,
            Err(err) => {
                warn!("load_dhcp_packet hook failed: {err}");
                return Outcome::NoReply;
            }
        }

        let destination = self.destination_for(request, &reply);
        Outcome::Reply {
            packet: reply,
            destination,
        }
    }

    fn resolve(
        &self,
        mac: MacAddress,
        giaddr: Ipv4Address,
        now: Instant,
    ) -> Result<Option<LeaseDefinition>, DirectoryError> {
        let mut definitions = self.directory.lookup(mac)?;

        if definitions.is_empty() {
            match self.hooks.handle_unknown_mac(mac) {
                Ok(Some(synthesised)) => definitions.push(synthesised),
                Ok(None) => {}
                Err(err) => warn!("handle_unknown_mac hook failed for {mac}: {err}"),
            }
        }

        if definitions.is_empty() {
            self.rate_limiter.mark_unknown(mac, now);
            return Ok(None);
        }

        if definitions.len() == 1 {
            return Ok(Some(definitions.remove(0)));
        }

        if !giaddr.is_unspecified() {
            if let Some(pos) = definitions.iter().position(|lease| lease.contains(giaddr)) {
                return Ok(Some(definitions.remove(pos)));
            }
        }

        Err(DirectoryError::AmbiguousDefinitions {
            mac,
            count: definitions.len(),
            giaddr,
        })
    }

    fn base_reply(&self, request: &Packet) -> Packet {
        Packet {
            reply: true,
            htype: request.htype,
            hlen: request.hlen,
            hops: request.hops,
            xid: request.xid,
            secs: 0,
            broadcast: request.broadcast,
            ciaddr: Ipv4Address::UNSPECIFIED,
            yiaddr: Ipv4Address::UNSPECIFIED,
            siaddr: self.config.dhcp_server_ip,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            options: Default::default(),
            source: None,
            pxe: request.pxe,
        }
    }

    fn base_lease_options(&self, reply: &mut Packet, request: &Packet, lease: &LeaseDefinition) {
        reply.options.insert(
            options::IP_ADDRESS_LEASE_TIME,
            OptionValue::U32(lease.lease_time_seconds),
        );
        reply.options.insert(
            options::SERVER_IDENTIFIER,
            OptionValue::Ipv4(self.config.dhcp_server_ip),
        );
        if let Some(mask) = lease.subnet_mask {
            reply
                .options
                .insert(options::SUBNET_MASK, OptionValue::Ipv4(mask));
        }
        if !lease.gateways.is_empty() {
            reply.options.insert(
                options::ROUTER,
                OptionValue::Ipv4List(lease.gateways.clone()),
            );
        }
        if !lease.domain_name_servers.is_empty() {
            reply.options.insert(
                options::DOMAIN_NAME_SERVER,
                OptionValue::Ipv4List(lease.domain_name_servers.clone()),
            );
        }
        if let Some(broadcast) = lease.broadcast_address {
            reply
                .options
                .insert(options::BROADCAST_ADDRESS, OptionValue::Ipv4(broadcast));
        }
        if !lease.ntp_servers.is_empty() {
            reply.options.insert(
                options::NTP_SERVERS,
                OptionValue::Ipv4List(lease.ntp_servers.clone()),
            );
        }
        if let Some(domain_name) = &lease.domain_name {
            reply.options.insert(
                options::DOMAIN_NAME,
                OptionValue::Text(domain_name.clone()),
            );
        }
        for (name, bytes) in &lease.extra {
            if let Some(code) = options::code_by_name(name) {
                if let Ok(value) = OptionValue::decode(code, bytes) {
                    reply.options.insert(code, value);
                }
            }
        }

        self.echo_requested_options(reply, request, lease);
    }

    /// Echoes options 1, 3, 6, 15, 28, 42, 51, 54 are always present above;
    /// anything else the client listed in its option 55 (parameter request
    /// list) is filled in from `lease.extra` when available, per spec §4.G's
    /// "echo client-requested options from option 55 that are available".
    fn echo_requested_options(&self, reply: &mut Packet, request: &Packet, lease: &LeaseDefinition) {
        let Some(requested) = request
            .options
            .get(&options::PARAMETER_REQUEST_LIST)
            .and_then(OptionValue::as_bytes)
        else {
            return;
        };

        for &code in requested {
            if reply.options.contains_key(&code) {
                continue;
            }
            let Some(name) = options::name_by_code(code) else {
                continue;
            };
            let Some(bytes) = lease.extra.get(name) else {
                continue;
            };
            if let Ok(value) = OptionValue::decode(code, bytes) {
                reply.options.insert(code, value);
            }
        }
    }

    fn offer(&self, request: &Packet, lease: &LeaseDefinition) -> Option<Packet> {
        let mut reply = self.base_reply(request);
        reply.yiaddr = lease.ip;
        reply
            .options
            .insert(options::DHCP_MESSAGE_TYPE, OptionValue::Byte(2)); // OFFER
        self.base_lease_options(&mut reply, request, lease);
        Some(reply)
    }

    fn ack_selecting(&self, request: &Packet, lease: &LeaseDefinition) -> Option<Packet> {
        let server_matches = request
            .options
            .get(&options::SERVER_IDENTIFIER)
            .and_then(OptionValue::as_ipv4)
            == Some(self.config.dhcp_server_ip);
        let requested_matches = request
            .options
            .get(&options::REQUESTED_IP_ADDRESS)
            .and_then(OptionValue::as_ipv4)
            == Some(lease.ip);

        if server_matches && requested_matches {
            Some(self.ack(request, lease))
        } else {
            None
        }
    }

    fn ack_init_reboot(&self, request: &Packet, lease: &LeaseDefinition) -> Option<Packet> {
        let requested_matches = request
            .options
            .get(&options::REQUESTED_IP_ADDRESS)
            .and_then(OptionValue::as_ipv4)
            == Some(lease.ip);
        let on_subnet = request.giaddr.is_unspecified() || lease.contains(request.giaddr);

        if requested_matches && on_subnet {
            Some(self.ack(request, lease))
        } else if self.config.authoritative {
            Some(self.nak_packet(request))
        } else {
            None
        }
    }

    fn ack_renew(&self, request: &Packet, lease: &LeaseDefinition) -> Option<Packet> {
        if self.config.nak_renewals {
            return Some(self.nak_packet(request));
        }

        if request.ciaddr == lease.ip {
            Some(self.ack(request, lease))
        } else {
            None
        }
    }

    fn ack(&self, request: &Packet, lease: &LeaseDefinition) -> Packet {
        let mut reply = self.base_reply(request);
        reply.yiaddr = lease.ip;
        reply
            .options
            .insert(options::DHCP_MESSAGE_TYPE, OptionValue::Byte(5)); // ACK
        self.base_lease_options(&mut reply, request, lease);
        reply
    }

    fn nak_packet(&self, request: &Packet) -> Packet {
        let mut reply = self.base_reply(request);
        reply
            .options
            .insert(options::DHCP_MESSAGE_TYPE, OptionValue::Byte(6)); // NAK
        reply
            .options
            .insert(options::SERVER_IDENTIFIER, OptionValue::Ipv4(self.config.dhcp_server_ip));
        reply
    }

    fn nak(&self, request: &Packet) -> Outcome {
        let packet = self.nak_packet(request);
        let destination = self.destination_for(request, &packet);
        Outcome::Reply { packet, destination }
    }

    fn inform_ack(&self, request: &Packet, lease: &LeaseDefinition) -> Packet {
        let mut reply = self.base_reply(request);
        // INFORM replies carry no yiaddr and no lease-time options.
        reply
            .options
            .insert(options::DHCP_MESSAGE_TYPE, OptionValue::Byte(5)); // ACK
        reply.options.insert(
            options::SERVER_IDENTIFIER,
            OptionValue::Ipv4(self.config.dhcp_server_ip),
        );
        if let Some(mask) = lease.subnet_mask {
            reply
                .options
                .insert(options::SUBNET_MASK, OptionValue::Ipv4(mask));
        }
        if !lease.gateways.is_empty() {
            reply.options.insert(
                options::ROUTER,
                OptionValue::Ipv4List(lease.gateways.clone()),
            );
        }
        if !lease.domain_name_servers.is_empty() {
            reply.options.insert(
                options::DOMAIN_NAME_SERVER,
                OptionValue::Ipv4List(lease.domain_name_servers.clone()),
            );
        }
        reply
    }

    /// Best-effort LEASEQUERY reply: `DHCPLEASEACTIVE` (13) if the lease
    /// exists, `DHCPLEASEUNKNOWN` (12) otherwise. Flagged in `DESIGN.md` per
    /// spec §9 as needing site confirmation before production use.
    fn lease_query_reply(&self, request: &Packet, lease: Option<&LeaseDefinition>) -> Packet {
        let mut reply = self.base_reply(request);
        match lease {
            Some(lease) => {
                reply.yiaddr = lease.ip;
                reply
                    .options
                    .insert(options::DHCP_MESSAGE_TYPE, OptionValue::Byte(13));
                self.base_lease_options(&mut reply, request, lease);
            }
            None => {
                reply
                    .options
                    .insert(options::DHCP_MESSAGE_TYPE, OptionValue::Byte(12));
            }
        }
        reply
    }

    fn destination_for(&self, request: &Packet, reply: &Packet) -> Destination {
        let _ = reply;
        if !request.giaddr.is_unspecified() {
            return Destination {
                addr: SocketAddr::V4(SocketAddrV4::new(
                    request.giaddr.into(),
                    self.config.dhcp_server_port,
                )),
                source_port: self.config.dhcp_server_port,
            };
        }

        if request.broadcast || reply.yiaddr.is_unspecified() {
            return Destination {
                addr: SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::BROADCAST,
                    self.config.dhcp_client_port,
                )),
                source_port: self.config.dhcp_client_port,
            };
        }

        Destination {
            addr: SocketAddr::V4(SocketAddrV4::new(reply.yiaddr.into(), self.config.dhcp_client_port)),
            source_port: self.config.dhcp_client_port,
        }
    }

    pub fn tick(&self, now: Instant) {
        self.tick_bus.tick(now);
    }

    /// Publishes through the reinit bus (spec §4.I); escalates a failing
    /// subscriber as `ReinitFailure` for the caller to act on (spec §7).
    pub fn reinitialise(&self) -> Result<(), ReinitFailure> {
        self.reinit_bus.fire()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::directory::{LeaseDefinition, StaticDirectory, SubnetKey};
    use std::collections::HashMap;

    fn lease() -> LeaseDefinition {
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

    fn discover(mac: MacAddress, xid: u32) -> Packet {
        let mut options = std::collections::BTreeMap::new();
        options.insert(options::DHCP_MESSAGE_TYPE, OptionValue::Byte(1));
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac.octets());
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

    fn pipeline_with(mac: MacAddress) -> Pipeline {
        let mut backend = StaticDirectory::new();
        backend.insert(mac, lease());
        let config = Config::with_server_ip(Ipv4Address::new(192, 168, 0, 1));
        Pipeline::new(config, Box::new(backend), Box::new(NoopHooks))
    }

    #[test]
    fn discover_known_mac_produces_broadcast_offer() {
        let mac = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let pipeline = pipeline_with(mac);
        let request = discover(mac, 0xDEADBEEF);

        match pipeline.handle(request, Instant::now()) {
            Outcome::Reply { packet, destination } => {
                assert_eq!(packet.yiaddr, Ipv4Address::new(192, 168, 0, 100));
                assert_eq!(packet.options.get(&options::DHCP_MESSAGE_TYPE).and_then(OptionValue::as_byte), Some(2));
                assert_eq!(destination.addr.port(), 68);
            }
            _ => panic!("expected an OFFER"),
        }
    }

    #[test]
    fn unknown_mac_is_dropped_when_not_authoritative() {
        let config = Config::with_server_ip(Ipv4Address::new(192, 168, 0, 1));
        let pipeline = Pipeline::new(config, Box::new(StaticDirectory::new()), Box::new(NoopHooks));
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);

        match pipeline.handle(discover(mac, 1), Instant::now()) {
            Outcome::Dropped => {}
            _ => panic!("expected Dropped"),
        }
    }

    #[test]
    fn misbehaving_mac_is_rate_limited_after_threshold() {
        let mac = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let pipeline = pipeline_with(mac);
        let now = Instant::now();

        let mut replied = 0;
        for i in 0..11 {
            if matches!(pipeline.handle(discover(mac, i), now), Outcome::Reply { .. }) {
                replied += 1;
            }
        }

        assert_eq!(replied, 10);
    }
}
