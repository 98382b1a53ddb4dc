//! Rate Limiter (spec §4.F): per-MAC cooldown tracking with two classes,
//! `unknown` and `misbehaving`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitState {
    Ok,
    UnknownCooldown,
    MisbehavingCooldown,
}

#[derive(Debug, Clone)]
struct Record {
    state: RateLimitState,
    hits_this_window: u32,
    window_start: Instant,
    cooldown_until: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub unknown_client_timeout: Duration,
    pub misbehaving_client_timeout: Duration,
    pub suspend_threshold: u32,
    pub polling_interval: Duration,
    pub enable_suspend: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            unknown_client_timeout: Duration::from_secs(60),
            misbehaving_client_timeout: Duration::from_secs(150),
            suspend_threshold: 10,
            polling_interval: Duration::from_secs(30),
            enable_suspend: true,
        }
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    records: Mutex<HashMap<MacAddress, Record>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Updates the record for `mac` on every received packet and returns
    /// whether it should be admitted to the directory/pipeline stages,
    /// following spec §4.F's five-step pseudocode verbatim.
    pub fn admit(&self, mac: MacAddress, now: Instant) -> bool {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(mac).or_insert_with(|| Record {
            state: RateLimitState::Ok,
            hits_this_window: 0,
            window_start: now,
            cooldown_until: now,
        });

        if record.state != RateLimitState::Ok
            && now >= record.cooldown_until + self.config.polling_interval
        {
            *record = Record {
                state: RateLimitState::Ok,
                hits_this_window: 0,
                window_start: now,
                cooldown_until: now,
            };
        }

        if now.duration_since(record.window_start) >= self.config.polling_interval {
            record.hits_this_window = 0;
            record.window_start = now;
        }

        record.hits_this_window += 1;

        if self.config.enable_suspend && record.hits_this_window > self.config.suspend_threshold {
            record.state = RateLimitState::MisbehavingCooldown;
            record.cooldown_until = now + self.config.misbehaving_client_timeout;
        }

        record.state == RateLimitState::Ok || now >= record.cooldown_until
    }

    /// Marks `mac` as unknown (directory returned no definition), placing it
    /// in a cooldown during which subsequent packets are dropped silently.
    pub fn mark_unknown(&self, mac: MacAddress, now: Instant) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(mac).or_insert_with(|| Record {
            state: RateLimitState::Ok,
            hits_this_window: 0,
            window_start: now,
            cooldown_until: now,
        });

        if record.state == RateLimitState::Ok {
            record.state = RateLimitState::UnknownCooldown;
            record.cooldown_until = now + self.config.unknown_client_timeout;
        }
    }

    pub fn is_admitted(&self, mac: MacAddress, now: Instant) -> bool {
        let records = self.records.lock().unwrap();
        match records.get(&mac) {
            Some(record) => record.state == RateLimitState::Ok || now >= record.cooldown_until,
            None => true,
        }
    }

    /// Purges records whose cooldown plus one window has elapsed
    /// (spec §3's rate-limiter lifecycle), driven by the tick bus.
    pub fn purge_expired(&self, now: Instant) {
        let mut records = self.records.lock().unwrap();
        records.retain(|_, record| {
            record.state == RateLimitState::Ok
                || now < record.cooldown_until + self.config.polling_interval
        });
    }

    #[cfg(test)]
    fn state_of(&self, mac: MacAddress) -> Option<RateLimitState> {
        self.records.lock().unwrap().get(&mac).map(|r| r.state)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn admits_up_to_suspend_threshold_then_cools_down() {
        let config = RateLimiterConfig {
            suspend_threshold: 10,
            ..Default::default()
        };
        let limiter = RateLimiter::new(config);
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);
        let now = Instant::now();

        for _ in 0..10 {
            assert!(limiter.admit(mac, now));
        }
        assert!(!limiter.admit(mac, now));
        assert_eq!(limiter.state_of(mac), Some(RateLimitState::MisbehavingCooldown));
    }

    #[test]
    fn unknown_mac_is_dropped_during_cooldown() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);
        let now = Instant::now();

        limiter.mark_unknown(mac, now);
        assert!(!limiter.is_admitted(mac, now + Duration::from_secs(1)));
        assert!(limiter.is_admitted(
            mac,
            now + Duration::from_secs(60) + Duration::from_secs(1)
        ));
    }
}
