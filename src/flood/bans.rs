//! Shared ban table keyed by peer address
//!
//! One table is shared by every hub session of a process (one for TCP
//! connect requests, one for UDP search seekers). Checks take the read lock,
//! ban/unban/sweep take the write lock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::IpAddr;

/// Most hub URLs remembered per entry
pub const MAX_HUB_URLS: usize = 8;

/// Peer identity for flood accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpPortKey {
    pub ip: IpAddr,
    pub port: u16,
}

impl IpPortKey {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl std::fmt::Display for IpPortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// Result of a ban lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanState {
    NoBan,
    /// Protected, never auto-banned
    DontBan,
    BanActive,
    BanExpired,
}

/// One ban table entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanEntry {
    /// Unix millis after which the ban lapses
    pub unban_time: u64,
    pub protected: bool,
    /// Request count at the time of the (last) ban
    pub req_count: u64,
    /// Hubs whose traffic triggered the ban
    pub hub_urls: Vec<String>,
}

/// Address-keyed ban table
#[derive(Debug)]
pub struct BanTable {
    entries: RwLock<HashMap<IpPortKey, BanEntry>>,
    ban_duration_ms: u64,
}

impl BanTable {
    pub fn new(ban_time_secs: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ban_duration_ms: ban_time_secs.saturating_mul(1000),
        }
    }

    pub fn check_ban(&self, key: &IpPortKey, now: u64) -> BanState {
        let entries = self.entries.read();
        match entries.get(key) {
            None => BanState::NoBan,
            Some(entry) if entry.protected => BanState::DontBan,
            Some(entry) if now > entry.unban_time => BanState::BanExpired,
            Some(_) => BanState::BanActive,
        }
    }

    /// Ban (or re-ban) `key` until `now` plus the configured duration.
    pub fn add_ban(&self, key: IpPortKey, now: u64, hub_url: &str, req_count: u64) {
        let mut entries = self.entries.write();
        let entry = entries.entry(key).or_default();
        if entry.protected {
            return;
        }
        entry.unban_time = now.saturating_add(self.ban_duration_ms);
        entry.req_count = req_count;
        if !entry.hub_urls.iter().any(|u| u == hub_url) {
            if entry.hub_urls.len() >= MAX_HUB_URLS {
                entry.hub_urls.remove(0);
            }
            entry.hub_urls.push(hub_url.to_string());
        }
    }

    /// Drop a ban; protected entries stay.
    pub fn remove_ban(&self, key: &IpPortKey) {
        let mut entries = self.entries.write();
        if entries.get(key).map_or(false, |e| !e.protected) {
            entries.remove(key);
        }
    }

    /// Mark `key` as never-ban, or lift that protection.
    pub fn protect(&self, key: IpPortKey, enable: bool) {
        let mut entries = self.entries.write();
        if enable {
            entries.insert(
                key,
                BanEntry {
                    protected: true,
                    ..Default::default()
                },
            );
        } else if entries.get(&key).map_or(false, |e| e.protected) {
            entries.remove(&key);
        }
    }

    /// Sweep expired non-protected entries; returns how many were removed.
    pub fn remove_expired(&self, now: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.protected || now <= e.unban_time);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// One line per entry, sorted by address.
    pub fn report(&self, label: &str, now: u64) -> String {
        let entries = self.entries.read();
        let mut keys: Vec<_> = entries.keys().copied().collect();
        keys.sort();

        let mut out = String::new();
        for key in keys {
            let entry = &entries[&key];
            let _ = write!(out, "{} {} reqs={}", label, key, entry.req_count);
            if entry.protected {
                out.push_str(" protected");
            } else {
                if now < entry.unban_time {
                    let _ = write!(out, " expires={}", (entry.unban_time - now) / 1000);
                } else {
                    out.push_str(" expired");
                }
                let _ = write!(out, " hubs=[{}]", entry.hub_urls.join(", "));
            }
            out.push('\n');
        }
        out
    }
}
