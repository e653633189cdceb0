//! Process-wide user registry
//!
//! Owns one [`RegisteredUser`] per CID. Hub directories refer to entries by
//! CID only and never hold a pointer back into the registry.

use crate::users::cid::Cid;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A user known to at least one hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredUser {
    pub cid: Cid,
    /// Nick from the most recent registration
    pub nick: String,
    /// Hubs where the user is currently online
    pub hubs: Vec<String>,
}

#[derive(Debug, Default)]
pub struct UserRegistry {
    users: RwLock<HashMap<Cid, RegisteredUser>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `cid` online on `hub_url`. Zero CIDs are ignored.
    pub fn put_online(&self, cid: Cid, nick: &str, hub_url: &str) {
        if cid.is_zero() {
            return;
        }
        let mut users = self.users.write();
        let user = users.entry(cid).or_insert_with(|| RegisteredUser {
            cid,
            nick: nick.to_string(),
            hubs: Vec::new(),
        });
        user.nick = nick.to_string();
        if !user.hubs.iter().any(|h| h == hub_url) {
            user.hubs.push(hub_url.to_string());
        } else {
            debug!("{} already online on {}", nick, hub_url);
        }
    }

    /// Mark `cid` offline on `hub_url`; the entry goes once no hub is left.
    pub fn put_offline(&self, cid: Cid, hub_url: &str) {
        if cid.is_zero() {
            return;
        }
        let mut users = self.users.write();
        if let Some(user) = users.get_mut(&cid) {
            user.hubs.retain(|h| h != hub_url);
            if user.hubs.is_empty() {
                users.remove(&cid);
            }
        }
    }

    pub fn find(&self, cid: &Cid) -> Option<RegisteredUser> {
        self.users.read().get(cid).cloned()
    }

    pub fn is_online(&self, cid: &Cid) -> bool {
        self.users.read().contains_key(cid)
    }

    pub fn online_count(&self) -> usize {
        self.users.read().len()
    }

    /// Number of hubs `cid` is registered on
    pub fn hub_count(&self, cid: &Cid) -> usize {
        self.users.read().get(cid).map_or(0, |u| u.hubs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_offline() {
        let reg = UserRegistry::new();
        let cid = Cid::for_nick("bob", "dchub://a");
        reg.put_online(cid, "bob", "dchub://a");
        reg.put_online(cid, "bob", "dchub://b");
        reg.put_online(cid, "bob", "dchub://a");
        assert_eq!(reg.hub_count(&cid), 2);

        reg.put_offline(cid, "dchub://a");
        assert!(reg.is_online(&cid));
        reg.put_offline(cid, "dchub://b");
        assert!(!reg.is_online(&cid));
        assert_eq!(reg.online_count(), 0);
    }

    #[test]
    fn test_zero_cid_ignored() {
        let reg = UserRegistry::new();
        reg.put_online(Cid::ZERO, "ghost", "dchub://a");
        assert_eq!(reg.online_count(), 0);
        reg.put_offline(Cid::ZERO, "dchub://a");
    }
}
