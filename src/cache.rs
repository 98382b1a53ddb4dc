//! Cache Layer (spec §4.E). `MemoryCache` and `DiskCache` both implement
//! `Directory` and wrap an optional inner `Directory` to chain against,
//! grounded on
//! `original_source/.../databases/_caching.py`'s `_DatabaseCache` /
//! `MemoryCache` / `DiskCache`, with the inheritance-based base class
//! replaced by composition per spec §9.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use log::debug;
use rusqlite::Connection;

use crate::directory::{Directory, LeaseDefinition, NetworkParams, SubnetKey};
use crate::error::DirectoryError;
use crate::types::{Ipv4Address, MacAddress};

/// Joins a `mac_index` hit with its `subnet_index` row into a full
/// `LeaseDefinition`.
fn assemble(
    ip: Ipv4Address,
    hostname: Option<String>,
    key: SubnetKey,
    extra: HashMap<String, Vec<u8>>,
    params: &NetworkParams,
) -> LeaseDefinition {
    LeaseDefinition {
        ip,
        lease_time_seconds: params.lease_time_seconds,
        subnet_key: key,
        hostname,
        gateways: params.gateways.clone(),
        subnet_mask: params.subnet_mask,
        broadcast_address: params.broadcast_address,
        domain_name: params.domain_name.clone(),
        domain_name_servers: params.domain_name_servers.clone(),
        ntp_servers: params.ntp_servers.clone(),
        extra,
    }
}

/// Two maps, one lock, joined at lookup time (spec §4.E).
#[derive(Default)]
struct MemoryCacheInner {
    mac_index: HashMap<MacAddress, (Ipv4Address, Option<String>, SubnetKey, HashMap<String, Vec<u8>>)>,
    subnet_index: HashMap<SubnetKey, NetworkParams>,
}

pub struct MemoryCache {
    name: &'static str,
    inner: Mutex<MemoryCacheInner>,
    chained: Option<Box<dyn Directory>>,
}

impl MemoryCache {
    pub fn new(name: &'static str, chained: Option<Box<dyn Directory>>) -> Self {
        Self {
            name,
            inner: Mutex::new(MemoryCacheInner::default()),
            chained,
        }
    }

    fn store(&self, mac: MacAddress, lease: &LeaseDefinition) {
        let mut inner = self.inner.lock().unwrap();
        inner.subnet_index
            .insert(lease.subnet_key.clone(), lease.network_params());
        inner.mac_index.insert(
            mac,
            (
                lease.ip,
                lease.hostname.clone(),
                lease.subnet_key.clone(),
                lease.extra.clone(),
            ),
        );
    }

    fn lookup_local(&self, mac: MacAddress) -> Option<LeaseDefinition> {
        let inner = self.inner.lock().unwrap();
        let (ip, hostname, key, extra) = inner.mac_index.get(&mac)?.clone();
        let params = inner.subnet_index.get(&key)?.clone();
        Some(assemble(ip, hostname, key, extra, &params))
    }
}

impl Directory for MemoryCache {
    fn lookup(&self, mac: MacAddress) -> Result<Vec<LeaseDefinition>, DirectoryError> {
        if let Some(lease) = self.lookup_local(mac) {
            debug!("{}: hit for {mac}", self.name);
            return Ok(vec![lease]);
        }

        debug!("{}: miss for {mac}", self.name);
        let Some(chained) = &self.chained else {
            return Ok(Vec::new());
        };

        let leases = chained.lookup(mac)?;
        for lease in &leases {
            self.store(mac, lease);
        }
        Ok(leases)
    }

    fn reinitialise(&self) -> Result<(), DirectoryError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.mac_index.clear();
            inner.subnet_index.clear();
        }
        if let Some(chained) = &self.chained {
            chained.reinitialise()?;
        }
        Ok(())
    }
}

/// The same schema materialised in SQLite, grounded on `DiskCache`'s two
/// tables (`subnets` PK `(subnet, serial)`, `maps` PK `mac`).
pub struct DiskCache {
    name: &'static str,
    conn: Mutex<Connection>,
    chained: Option<Box<dyn Directory>>,
}

impl DiskCache {
    pub fn open(name: &'static str, path: &Path, chained: Option<Box<dyn Directory>>) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Self::setup(&conn)?;
        Ok(Self {
            name,
            conn: Mutex::new(conn),
            chained,
        })
    }

    pub fn open_in_memory(name: &'static str, chained: Option<Box<dyn Directory>>) -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::setup(&conn)?;
        Ok(Self {
            name,
            conn: Mutex::new(conn),
            chained,
        })
    }

    fn setup(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS subnets (
                subnet TEXT NOT NULL,
                serial INTEGER NOT NULL,
                lease_time INTEGER NOT NULL,
                gateways TEXT NOT NULL,
                subnet_mask TEXT,
                broadcast_address TEXT,
                ntp_servers TEXT NOT NULL,
                domain_name_servers TEXT NOT NULL,
                domain_name TEXT,
                PRIMARY KEY (subnet, serial)
            );
            CREATE TABLE IF NOT EXISTS maps (
                mac TEXT PRIMARY KEY,
                ip TEXT NOT NULL,
                hostname TEXT,
                subnet TEXT NOT NULL,
                serial INTEGER NOT NULL,
                extra TEXT NOT NULL DEFAULT ''
            );",
        )
    }

    fn store(&self, mac: MacAddress, lease: &LeaseDefinition) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO subnets
                (subnet, serial, lease_time, gateways, subnet_mask, broadcast_address,
                 ntp_servers, domain_name_servers, domain_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                lease.subnet_key.subnet_id,
                lease.subnet_key.serial,
                lease.lease_time_seconds,
                join_ipv4(&lease.gateways),
                lease.subnet_mask.map(|a| a.to_string()),
                lease.broadcast_address.map(|a| a.to_string()),
                join_ipv4(&lease.ntp_servers),
                join_ipv4(&lease.domain_name_servers),
                lease.domain_name,
            ],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO maps (mac, ip, hostname, subnet, serial, extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                mac.to_string(),
                lease.ip.to_string(),
                lease.hostname,
                lease.subnet_key.subnet_id,
                lease.subnet_key.serial,
                encode_extra(&lease.extra),
            ],
        )?;
        Ok(())
    }

    fn lookup_local(&self, mac: MacAddress) -> rusqlite::Result<Option<LeaseDefinition>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.ip, m.hostname, s.subnet, s.serial, s.lease_time, s.gateways,
                    s.subnet_mask, s.broadcast_address, s.ntp_servers, s.domain_name_servers,
                    s.domain_name, m.extra
             FROM maps m, subnets s
             WHERE m.mac = ?1 AND m.subnet = s.subnet AND m.serial = s.serial
             LIMIT 1",
        )?;

        let mut rows = stmt.query(rusqlite::params![mac.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let ip: String = row.get(0)?;
        let hostname: Option<String> = row.get(1)?;
        let subnet_id: String = row.get(2)?;
        let serial: u32 = row.get(3)?;
        let lease_time: u32 = row.get(4)?;
        let gateways: String = row.get(5)?;
        let subnet_mask: Option<String> = row.get(6)?;
        let broadcast_address: Option<String> = row.get(7)?;
        let ntp_servers: String = row.get(8)?;
        let domain_name_servers: String = row.get(9)?;
        let domain_name: Option<String> = row.get(10)?;
        let extra: String = row.get(11)?;

        Ok(Some(LeaseDefinition {
            ip: ip.parse().unwrap_or(Ipv4Address::UNSPECIFIED),
            lease_time_seconds: lease_time,
            subnet_key: SubnetKey { subnet_id, serial },
            hostname,
            gateways: split_ipv4(&gateways),
            subnet_mask: subnet_mask.and_then(|s| s.parse().ok()),
            broadcast_address: broadcast_address.and_then(|s| s.parse().ok()),
            domain_name,
            domain_name_servers: split_ipv4(&domain_name_servers),
            ntp_servers: split_ipv4(&ntp_servers),
            extra: decode_extra(&extra),
        }))
    }
}

fn join_ipv4(addrs: &[Ipv4Address]) -> String {
    addrs
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn split_ipv4(joined: &str) -> Vec<Ipv4Address> {
    joined
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Serializes a lease's `extra` options as `name:hexbytes` pairs joined by
/// `;`; option names come from the registry's `NAMES` table and never
/// contain either separator.
fn encode_extra(extra: &HashMap<String, Vec<u8>>) -> String {
    extra
        .iter()
        .map(|(name, bytes)| format!("{name}:{}", hex_encode(bytes)))
        .collect::<Vec<_>>()
        .join(";")
}

fn decode_extra(joined: &str) -> HashMap<String, Vec<u8>> {
    joined
        .split(';')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (name, hex) = entry.split_once(':')?;
            Some((name.to_string(), hex_decode(hex)))
        })
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .filter_map(|i| hex.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

impl Directory for DiskCache {
    fn lookup(&self, mac: MacAddress) -> Result<Vec<LeaseDefinition>, DirectoryError> {
        let local = self.lookup_local(mac).map_err(|e| DirectoryError::Backend {
            mac,
            message: e.to_string(),
        })?;

        if let Some(lease) = local {
            debug!("{}: hit for {mac}", self.name);
            return Ok(vec![lease]);
        }

        debug!("{}: miss for {mac}", self.name);
        let Some(chained) = &self.chained else {
            return Ok(Vec::new());
        };

        let leases = chained.lookup(mac)?;
        for lease in &leases {
            self.store(mac, lease).map_err(|e| DirectoryError::Backend {
                mac,
                message: e.to_string(),
            })?;
        }
        Ok(leases)
    }

    fn reinitialise(&self) -> Result<(), DirectoryError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute_batch("DELETE FROM maps; DELETE FROM subnets;")
                .map_err(|e| DirectoryError::Backend {
                    mac: MacAddress::new([0; 6]),
                    message: e.to_string(),
                })?;
        }
        if let Some(chained) = &self.chained {
            chained.reinitialise()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::directory::StaticDirectory;

    fn sample_lease(ip: Ipv4Address) -> LeaseDefinition {
        let mut extra = HashMap::new();
        extra.insert("tftp_server_name".to_string(), b"10.0.0.9".to_vec());

        LeaseDefinition {
            ip,
            lease_time_seconds: 3600,
            subnet_key: SubnetKey {
                subnet_id: "lan".into(),
                serial: 0,
            },
            hostname: Some("host".into()),
            gateways: vec![Ipv4Address::new(192, 168, 0, 1)],
            subnet_mask: Some(Ipv4Address::new(255, 255, 255, 0)),
            broadcast_address: Some(Ipv4Address::new(192, 168, 0, 255)),
            domain_name: Some("example.com".into()),
            domain_name_servers: vec![Ipv4Address::new(8, 8, 8, 8)],
            ntp_servers: vec![],
            extra,
        }
    }

    #[test]
    fn memory_cache_promotes_chained_hit_and_reinitialises() {
        let mac = MacAddress::new([0, 1, 2, 3, 4, 5]);
        let mut backend = StaticDirectory::new();
        backend.insert(mac, sample_lease(Ipv4Address::new(192, 168, 0, 100)));

        let cache = MemoryCache::new("test", Some(Box::new(backend)));
        let first = cache.lookup(mac).unwrap();
        assert_eq!(first[0].ip, Ipv4Address::new(192, 168, 0, 100));
        assert_eq!(
            first[0].extra.get("tftp_server_name").map(Vec::as_slice),
            Some(&b"10.0.0.9"[..])
        );
        assert!(cache.lookup_local(mac).is_some());

        cache.reinitialise().unwrap();
        assert!(cache.lookup_local(mac).is_none());
    }

    #[test]
    fn disk_cache_round_trips_full_definition() {
        let mac = MacAddress::new([0, 1, 2, 3, 4, 5]);
        let mut backend = StaticDirectory::new();
        backend.insert(mac, sample_lease(Ipv4Address::new(10, 0, 0, 5)));

        let cache = DiskCache::open_in_memory("test", Some(Box::new(backend))).unwrap();
        let looked_up = cache.lookup(mac).unwrap();
        assert_eq!(looked_up[0].domain_name.as_deref(), Some("example.com"));
        assert_eq!(
            looked_up[0].extra.get("tftp_server_name").map(Vec::as_slice),
            Some(&b"10.0.0.9"[..])
        );

        let looked_up_again = cache.lookup(mac).unwrap();
        assert_eq!(looked_up_again[0].ip, Ipv4Address::new(10, 0, 0, 5));
    }
}
