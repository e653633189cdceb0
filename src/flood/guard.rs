//! Per-peer request-rate tracking
//!
//! A [`FloodGuard`] counts requests from each `(ip, port)` over a trailing
//! window and bans through the shared [`BanTable`] when a peer both reaches
//! the minimum count and exceeds the per-minute ceiling.

use crate::flood::bans::{BanState, BanTable, IpPortKey};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

/// Flood thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiFloodConfig {
    /// Requests inside the window before the rate is considered at all
    pub min_req_count: u32,
    /// Average requests per minute that counts as flooding
    pub max_req_per_minute: u32,
    pub ban_time_secs: u64,
    pub window_secs: u64,
}

impl Default for AntiFloodConfig {
    fn default() -> Self {
        Self {
            min_req_count: 5,
            max_req_per_minute: 10,
            ban_time_secs: 3600,
            window_secs: 600,
        }
    }
}

/// Sliding window of request timestamps for one peer
#[derive(Debug, Clone, Default)]
pub struct RequestCounter {
    times: VecDeque<u64>,
    /// Set once this peer has been banned through this guard
    pub banned: bool,
}

impl RequestCounter {
    /// Record a request at `now` and drop entries older than the window.
    pub fn add(&mut self, now: u64, window_ms: u64) {
        self.times.push_back(now);
        self.prune(now, window_ms);
    }

    fn prune(&mut self, now: u64, window_ms: u64) {
        while let Some(&front) = self.times.front() {
            if now.saturating_sub(front) > window_ms {
                self.times.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.times.len() as u64
    }

    /// Requests per minute across the span actually covered.
    pub fn avg_per_minute(&self) -> u64 {
        match (self.times.front(), self.times.back()) {
            (Some(first), Some(last)) => {
                let span = last.saturating_sub(*first).max(1);
                self.count() * 60_000 / span
            }
            _ => 0,
        }
    }

    fn last(&self) -> Option<u64> {
        self.times.back().copied()
    }
}

/// Outcome of [`FloodGuard::record_request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    /// First detection; worth one user-visible notice
    pub show_msg: bool,
}

/// Request-rate gate for one request class on one hub
#[derive(Debug)]
pub struct FloodGuard {
    bans: Arc<BanTable>,
    counters: Mutex<HashMap<IpPortKey, RequestCounter>>,
    config: AntiFloodConfig,
}

impl FloodGuard {
    pub fn new(bans: Arc<BanTable>, config: AntiFloodConfig) -> Self {
        Self {
            bans,
            counters: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn bans(&self) -> &Arc<BanTable> {
        &self.bans
    }

    pub fn check_ban(&self, ip: IpAddr, port: u16, now: u64) -> BanState {
        self.bans.check_ban(&IpPortKey::new(ip, port), now)
    }

    /// Count a request and decide whether it may be served.
    pub fn record_request(&self, ip: IpAddr, port: u16, now: u64, source: &str) -> Verdict {
        let key = IpPortKey::new(ip, port);
        let mut state = self.bans.check_ban(&key, now);
        let mut show_msg = false;

        let mut counters = self.counters.lock();
        let counter = counters.entry(key).or_default();
        counter.add(now, self.config.window_secs.saturating_mul(1000));
        let req_count = counter.count();
        let flood = req_count >= u64::from(self.config.min_req_count)
            && counter.avg_per_minute() > u64::from(self.config.max_req_per_minute);

        if flood && !counter.banned && state != BanState::DontBan {
            counter.banned = true;
            self.bans.add_ban(key, now, source, req_count);
            state = BanState::BanActive;
            show_msg = true;
            debug!("Flood from {} on {}: {} requests", key, source, req_count);
        }
        if state == BanState::BanExpired {
            if flood {
                if !counter.banned {
                    counter.banned = true;
                    show_msg = true;
                }
                self.bans.add_ban(key, now, source, req_count);
                state = BanState::BanActive;
            } else {
                self.bans.remove_ban(&key);
            }
        }

        Verdict {
            allowed: state != BanState::BanActive,
            show_msg,
        }
    }

    /// Drop counters idle for longer than the window and sweep the ban table.
    pub fn remove_expired(&self, now: u64) {
        let window_ms = self.config.window_secs.saturating_mul(1000);
        self.counters
            .lock()
            .retain(|_, c| c.last().map_or(false, |t| now.saturating_sub(t) <= window_ms));
        self.bans.remove_expired(now);
    }

    pub fn tracked(&self) -> usize {
        self.counters.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> FloodGuard {
        FloodGuard::new(Arc::new(BanTable::new(3600)), AntiFloodConfig::default())
    }

    fn ip() -> IpAddr {
        IpAddr::from([192, 168, 1, 20])
    }

    #[test]
    fn test_burst_is_banned() {
        let guard = guard();
        let mut verdicts = Vec::new();
        for i in 0..5u64 {
            verdicts.push(guard.record_request(ip(), 412, 1_000 + i * 2_500, "dchub://a"));
        }
        assert!(verdicts[..4].iter().all(|v| v.allowed));
        assert!(!verdicts[4].allowed);
        assert!(verdicts[4].show_msg);
        assert_eq!(guard.check_ban(ip(), 412, 12_000), BanState::BanActive);

        let again = guard.record_request(ip(), 412, 13_000, "dchub://a");
        assert!(!again.allowed);
        assert!(!again.show_msg);
    }

    #[test]
    fn test_slow_peer_not_banned() {
        let guard = guard();
        let two_hours = 2 * 3600 * 1000;
        for i in 0..5u64 {
            let v = guard.record_request(ip(), 412, i * two_hours / 4, "dchub://a");
            assert!(v.allowed);
        }
        assert_eq!(guard.check_ban(ip(), 412, two_hours), BanState::NoBan);
    }

    #[test]
    fn test_protected_never_banned() {
        let guard = guard();
        guard.bans().protect(IpPortKey::new(ip(), 412), true);
        for i in 0..50u64 {
            assert!(guard.record_request(ip(), 412, i, "dchub://a").allowed);
        }
        assert_eq!(guard.check_ban(ip(), 412, 100), BanState::DontBan);
    }

    #[test]
    fn test_expired_ban_lifted_when_quiet() {
        let bans = Arc::new(BanTable::new(1));
        let guard = FloodGuard::new(bans.clone(), AntiFloodConfig::default());
        for i in 0..5u64 {
            guard.record_request(ip(), 412, i, "dchub://a");
        }
        assert_eq!(bans.check_ban(&IpPortKey::new(ip(), 412), 10), BanState::BanActive);

        // well past the ban and the window
        let later = 20 * 60 * 1000;
        assert!(guard.record_request(ip(), 412, later, "dchub://a").allowed);
        assert_eq!(bans.check_ban(&IpPortKey::new(ip(), 412), later), BanState::NoBan);
    }

    #[test]
    fn test_expired_ban_renewed_when_flooding() {
        let bans = Arc::new(BanTable::new(1));
        let guard = FloodGuard::new(bans.clone(), AntiFloodConfig::default());
        for i in 0..5u64 {
            guard.record_request(ip(), 412, i * 100, "dchub://a");
        }
        let v = guard.record_request(ip(), 412, 2_000, "dchub://a");
        assert!(!v.allowed);
        assert!(!v.show_msg);
        assert_eq!(bans.check_ban(&IpPortKey::new(ip(), 412), 2_500), BanState::BanActive);
    }

    #[test]
    fn test_remove_expired_counters() {
        let guard = guard();
        guard.record_request(ip(), 1, 0, "h");
        guard.record_request(ip(), 2, 500_000, "h");
        guard.remove_expired(700_000);
        assert_eq!(guard.tracked(), 1);
    }

    #[test]
    fn test_avg_per_minute() {
        let mut counter = RequestCounter::default();
        assert_eq!(counter.avg_per_minute(), 0);
        for t in [0, 10_000, 20_000, 30_000, 40_000, 60_000] {
            counter.add(t, 600_000);
        }
        assert_eq!(counter.count(), 6);
        assert_eq!(counter.avg_per_minute(), 6);
    }
}
