//! The recognised configuration surface (spec §6). No file parsing here —
//! spec §1 keeps "configuration-file parsing" out of scope as an external
//! collaborator; this is just the typed struct a loader would populate.

use std::time::Duration;

use crate::ratelimit::RateLimiterConfig;
use crate::types::Ipv4Address;

#[derive(Debug, Clone)]
pub struct Config {
    pub system_name: String,
    pub daemon: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub pid_file: Option<String>,

    pub dhcp_server_ip: Ipv4Address,
    pub dhcp_server_port: u16,
    pub dhcp_client_port: u16,
    pub pxe_port: Option<u16>,
    pub dhcp_response_interface: Option<String>,

    pub allow_local_dhcp: bool,
    pub allow_dhcp_relays: bool,
    pub allowed_dhcp_relays: Vec<Ipv4Address>,
    pub authoritative: bool,
    pub nak_renewals: bool,

    pub unauthorized_client_timeout_seconds: u32,
    pub misbehaving_client_timeout_seconds: u32,
    pub enable_suspend: bool,
    pub suspend_threshold: u32,
    pub polling_interval_seconds: u32,

    pub use_cache: bool,
}

impl Config {
    /// A config carrying only the mandatory field and every documented
    /// default from spec §6.
    pub fn with_server_ip(dhcp_server_ip: Ipv4Address) -> Self {
        Self {
            system_name: "staticDHCPd".to_string(),
            daemon: true,
            uid: None,
            gid: None,
            pid_file: None,

            dhcp_server_ip,
            dhcp_server_port: 67,
            dhcp_client_port: 68,
            pxe_port: None,
            dhcp_response_interface: None,

            allow_local_dhcp: true,
            allow_dhcp_relays: false,
            allowed_dhcp_relays: Vec::new(),
            authoritative: false,
            nak_renewals: false,

            unauthorized_client_timeout_seconds: 60,
            misbehaving_client_timeout_seconds: 150,
            enable_suspend: true,
            suspend_threshold: 10,
            polling_interval_seconds: 30,

            use_cache: false,
        }
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            unknown_client_timeout: Duration::from_secs(self.unauthorized_client_timeout_seconds as u64),
            misbehaving_client_timeout: Duration::from_secs(
                self.misbehaving_client_timeout_seconds as u64,
            ),
            suspend_threshold: self.suspend_threshold,
            polling_interval: Duration::from_secs(self.polling_interval_seconds as u64),
            enable_suspend: self.enable_suspend,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::with_server_ip(Ipv4Address::new(192, 168, 0, 1));
        assert_eq!(config.dhcp_server_port, 67);
        assert_eq!(config.dhcp_client_port, 68);
        assert!(!config.allow_dhcp_relays);
        assert!(!config.authoritative);
        assert_eq!(config.suspend_threshold, 10);
    }
}
