//! State shared by every hub session of one client

use crate::flood::BanTable;
use crate::hub::diagnostics::Diagnostics;
use crate::users::{Cid, UserRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// How we are logged in on a hub, for the `H:` tag counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HubRole {
    Normal,
    Registered,
    Operator,
}

/// Registry, ban tables and diagnostics shared across sessions
#[derive(Debug)]
pub struct ClientContext {
    pub registry: Arc<UserRegistry>,
    pub diagnostics: Arc<Diagnostics>,
    /// Bans for inbound connect requests
    pub tcp_bans: Arc<BanTable>,
    /// Bans for active search seekers
    pub udp_bans: Arc<BanTable>,
    my_cid: Cid,
    roles: Mutex<HashMap<String, HubRole>>,
}

impl ClientContext {
    pub fn new(ban_time_secs: u64) -> Self {
        Self::with_cid(Cid::generate(), ban_time_secs)
    }

    pub fn with_cid(my_cid: Cid, ban_time_secs: u64) -> Self {
        Self {
            registry: Arc::new(UserRegistry::new()),
            diagnostics: Arc::new(Diagnostics::new()),
            tcp_bans: Arc::new(BanTable::new(ban_time_secs)),
            udp_bans: Arc::new(BanTable::new(ban_time_secs)),
            my_cid,
            roles: Mutex::new(HashMap::new()),
        }
    }

    pub fn my_cid(&self) -> Cid {
        self.my_cid
    }

    /// Record our role on `hub_url`; roles only go up until cleared.
    pub fn set_role(&self, hub_url: &str, role: HubRole) {
        let mut roles = self.roles.lock();
        let entry = roles.entry(hub_url.to_string()).or_insert(role);
        if role > *entry {
            *entry = role;
        }
    }

    pub fn clear_role(&self, hub_url: &str) {
        self.roles.lock().remove(hub_url);
    }

    /// `(normal, registered, operator)` hub counts
    pub fn hub_counts(&self) -> (u32, u32, u32) {
        let roles = self.roles.lock();
        let mut counts = (0, 0, 0);
        for role in roles.values() {
            match role {
                HubRole::Normal => counts.0 += 1,
                HubRole::Registered => counts.1 += 1,
                HubRole::Operator => counts.2 += 1,
            }
        }
        counts
    }

    /// Both ban tables, formatted
    pub fn ban_report(&self, now: u64) -> String {
        let mut out = self.tcp_bans.report("tcp", now);
        out.push_str(&self.udp_bans.report("udp", now));
        out
    }

    /// Periodic sweep of both ban tables
    pub fn remove_expired_bans(&self, now: u64) {
        self.tcp_bans.remove_expired(now);
        self.udp_bans.remove_expired(now);
    }
}
