//! The Directory Port (spec §4.D): the single abstract capability every
//! backend and cache in this crate implements.

use std::collections::HashMap;

use crate::error::DirectoryError;
use crate::types::{Ipv4Address, MacAddress};

/// The composite key a normalised row of network parameters lives under;
/// all clients sharing a key share one `NetworkParams` row in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubnetKey {
    pub subnet_id: String,
    pub serial: u32,
}

/// Network parameters shared by every lease under one `SubnetKey`.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkParams {
    pub gateways: Vec<Ipv4Address>,
    pub subnet_mask: Option<Ipv4Address>,
    pub broadcast_address: Option<Ipv4Address>,
    pub domain_name: Option<String>,
    pub domain_name_servers: Vec<Ipv4Address>,
    pub ntp_servers: Vec<Ipv4Address>,
    pub lease_time_seconds: u32,
}

/// The immutable record returned by the directory for a known MAC
/// (spec §3 "Lease Definition").
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseDefinition {
    pub ip: Ipv4Address,
    pub lease_time_seconds: u32,
    pub subnet_key: SubnetKey,
    pub hostname: Option<String>,
    pub gateways: Vec<Ipv4Address>,
    pub subnet_mask: Option<Ipv4Address>,
    pub broadcast_address: Option<Ipv4Address>,
    pub domain_name: Option<String>,
    pub domain_name_servers: Vec<Ipv4Address>,
    pub ntp_servers: Vec<Ipv4Address>,
    pub extra: HashMap<String, Vec<u8>>,
}

impl LeaseDefinition {
    pub fn network_params(&self) -> NetworkParams {
        NetworkParams {
            gateways: self.gateways.clone(),
            subnet_mask: self.subnet_mask,
            broadcast_address: self.broadcast_address,
            domain_name: self.domain_name.clone(),
            domain_name_servers: self.domain_name_servers.clone(),
            ntp_servers: self.ntp_servers.clone(),
            lease_time_seconds: self.lease_time_seconds,
        }
    }

    /// True if `giaddr` falls inside this lease's subnet, used by §4.G's
    /// multi-definition selection when a backend returns several
    /// candidates for one MAC.
    pub fn contains(&self, giaddr: Ipv4Address) -> bool {
        match self.subnet_mask {
            Some(mask) => {
                let prefix_len = u32::from_be_bytes(mask.octets()).count_ones();
                self.ip.is_subnet_member(giaddr, prefix_len)
            }
            None => false,
        }
    }
}

/// `lookup(mac) -> Option<LeaseDefinition>`, blocking-safe, concurrently
/// callable (spec §4.D). `reinitialise` is optional — the default no-op
/// suits backends with no internal state to flush.
pub trait Directory: Send + Sync {
    fn lookup(&self, mac: MacAddress) -> Result<Vec<LeaseDefinition>, DirectoryError>;

    fn reinitialise(&self) -> Result<(), DirectoryError> {
        Ok(())
    }
}

/// A directory backend with no known leases, for configurations that rely
/// entirely on `handle_unknown_mac`. Concrete backends (SQL, INI,
/// HTTP-JSON, Redis) are out of scope (spec §1) — this crate only defines
/// the port they implement.
#[derive(Debug, Default)]
pub struct EmptyDirectory;

impl Directory for EmptyDirectory {
    fn lookup(&self, _mac: MacAddress) -> Result<Vec<LeaseDefinition>, DirectoryError> {
        Ok(Vec::new())
    }
}

/// A fixed in-process map, useful for tests and small static deployments
/// where the "directory backend" really is just a table in memory.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    leases: HashMap<MacAddress, Vec<LeaseDefinition>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mac: MacAddress, lease: LeaseDefinition) {
        self.leases.entry(mac).or_default().push(lease);
    }
}

impl Directory for StaticDirectory {
    fn lookup(&self, mac: MacAddress) -> Result<Vec<LeaseDefinition>, DirectoryError> {
        Ok(self.leases.get(&mac).cloned().unwrap_or_default())
    }
}
