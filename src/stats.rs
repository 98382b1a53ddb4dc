//! Statistics & Reinit Bus (spec §4.I), generalizing
//! `original_source/branches/2.0.0/staticDHCPd/staticdhcpdlib/statistics.py`'s
//! module-level callback list + lock into three typed buses held by the
//! `Server` context (spec §9: no global mutable state).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{error, warn};

use crate::error::ReinitFailure;
use crate::types::{Ipv4Address, MacAddress};

/// One record per inbound DHCP packet, including dropped ones. Field order
/// matches `statistics.py`'s `Statistics` namedtuple.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub source_address: Option<std::net::SocketAddr>,
    pub mac: Option<MacAddress>,
    pub ip: Option<Ipv4Address>,
    pub subnet_id: Option<String>,
    pub serial: Option<u32>,
    pub method: Option<&'static str>,
    pub processing_time: Duration,
    pub processed: bool,
    pub pxe: bool,
}

type StatsCallback = Box<dyn Fn(&Statistics) + Send + Sync>;
type ReinitCallback = Box<dyn Fn() -> Result<(), String> + Send + Sync>;
type TickCallback = Box<dyn Fn(Instant) + Send + Sync>;

/// Append-only subscriber list, one lock. Callbacks are contractually
/// non-blocking (spec §5) and their failures are logged and swallowed —
/// unlike the reinit bus, a bad statistics subscriber must not take the
/// server down.
#[derive(Default)]
pub struct StatisticsBus {
    subscribers: Mutex<Vec<StatsCallback>>,
}

impl StatisticsBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn(&Statistics) + Send + Sync + 'static) {
        self.subscribers.lock().unwrap().push(Box::new(callback));
    }

    pub fn emit(&self, stats: &Statistics) {
        for subscriber in self.subscribers.lock().unwrap().iter() {
            subscriber(stats);
        }
    }
}

/// Reinitialisation callbacks. Unlike the statistics bus, a failing
/// callback here escalates: the caller propagates `ReinitFailure` and the
/// server clears its `alive` flag for orderly shutdown (spec §4.I, §7).
#[derive(Default)]
pub struct ReinitBus {
    subscribers: Mutex<Vec<ReinitCallback>>,
}

impl ReinitBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn() -> Result<(), String> + Send + Sync + 'static) {
        self.subscribers.lock().unwrap().push(Box::new(callback));
    }

    pub fn fire(&self) -> Result<(), ReinitFailure> {
        for subscriber in self.subscribers.lock().unwrap().iter() {
            if let Err(message) = subscriber() {
                error!("reinit callback failed: {message}");
                return Err(ReinitFailure { message });
            }
        }
        Ok(())
    }
}

/// A best-effort, approximately-once-per-second wake callback used for
/// timeout housekeeping: rate-limiter purge, notification cooldown decay.
#[derive(Default)]
pub struct TickBus {
    subscribers: Mutex<Vec<TickCallback>>,
}

impl TickBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn(Instant) + Send + Sync + 'static) {
        self.subscribers.lock().unwrap().push(Box::new(callback));
    }

    pub fn tick(&self, now: Instant) {
        for subscriber in self.subscribers.lock().unwrap().iter() {
            subscriber(now);
        }
    }
}

/// Per-error-kind cooldown gate so one broken backend or hook does not
/// flood the log/notification sink (spec §7's `DirectoryError`,
/// `SPEC_FULL.md` §10.5). Grounded in concept (not SMTP mechanics) on the
/// original's e-mail cooldown in the `logging-web` branch's `feedservice.py`.
pub struct NotificationCooldown {
    cooldown: Duration,
    last_fired: Mutex<Option<std::time::Instant>>,
}

impl NotificationCooldown {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: Mutex::new(None),
        }
    }

    /// Returns `true` (and records the firing) if a notification may be
    /// emitted now; `false` if still within cooldown.
    pub fn should_fire(&self, now: std::time::Instant) -> bool {
        let mut last_fired = self.last_fired.lock().unwrap();
        match *last_fired {
            Some(last) if now.duration_since(last) < self.cooldown => false,
            _ => {
                *last_fired = Some(now);
                true
            }
        }
    }

    pub fn warn_with_cooldown(&self, now: std::time::Instant, message: &str) {
        if self.should_fire(now) {
            warn!("{message}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn statistics_bus_fans_out_to_all_subscribers() {
        let bus = StatisticsBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(&Statistics {
            source_address: None,
            mac: None,
            ip: None,
            subnet_id: None,
            serial: None,
            method: None,
            processing_time: Duration::ZERO,
            processed: false,
            pxe: false,
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn tick_bus_passes_the_caller_supplied_instant() {
        let bus = TickBus::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        bus.subscribe(move |now| {
            *seen_clone.lock().unwrap() = Some(now);
        });

        let now = Instant::now();
        bus.tick(now);

        assert_eq!(*seen.lock().unwrap(), Some(now));
    }

    #[test]
    fn reinit_bus_propagates_failure() {
        let bus = ReinitBus::new();
        bus.subscribe(|| Err("boom".to_string()));
        assert!(bus.fire().is_err());
    }

    #[test]
    fn cooldown_gate_suppresses_repeat_firings() {
        let gate = NotificationCooldown::new(Duration::from_secs(60));
        let now = std::time::Instant::now();
        assert!(gate.should_fire(now));
        assert!(!gate.should_fire(now));
        assert!(gate.should_fire(now + Duration::from_secs(61)));
    }
}
