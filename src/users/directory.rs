//! Per-hub map of online users
//!
//! Lookups take the read lock, structural changes the write lock. Registry
//! notifications always happen after the directory lock is released, so the
//! registry's own lock is never taken while the directory lock is held.

use crate::users::cid::Cid;
use crate::users::identity::{Identity, UserFlags};
use crate::users::registry::UserRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// One participant of one hub
#[derive(Debug)]
pub struct OnlineUser {
    nick: String,
    cid: Cid,
    identity: RwLock<Identity>,
}

impl OnlineUser {
    fn new(nick: &str, cid: Cid) -> Self {
        Self {
            nick: nick.to_string(),
            cid,
            identity: RwLock::new(Identity::new(nick)),
        }
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    /// Snapshot of the identity
    pub fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    /// Mutate identity fields. Share size must go through
    /// [`UserDirectory::change_bytes_shared`].
    pub fn update<R>(&self, f: impl FnOnce(&mut Identity) -> R) -> R {
        f(&mut *self.identity.write())
    }

    pub fn has_flag(&self, flag: UserFlags) -> bool {
        self.identity.read().flags.contains(flag)
    }
}

pub type OnlineUserPtr = Arc<OnlineUser>;

/// Nick-keyed user map of one hub session
#[derive(Debug)]
pub struct UserDirectory {
    hub_url: String,
    users: RwLock<HashMap<String, OnlineUserPtr>>,
    bytes_shared: AtomicI64,
    registry: Arc<UserRegistry>,
}

impl UserDirectory {
    pub fn new(hub_url: &str, registry: Arc<UserRegistry>) -> Self {
        Self {
            hub_url: hub_url.to_string(),
            users: RwLock::new(HashMap::new()),
            bytes_shared: AtomicI64::new(0),
            registry,
        }
    }

    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    /// Return the user for `nick`, creating and registering it on first sight.
    pub fn get_or_create(&self, nick: &str) -> OnlineUserPtr {
        self.get_or_create_with(nick, Cid::for_nick(nick, &self.hub_url))
    }

    /// Same as [`get_or_create`](Self::get_or_create) with an explicit CID;
    /// used for the local user.
    pub fn get_or_create_with(&self, nick: &str, cid: Cid) -> OnlineUserPtr {
        if let Some(user) = self.users.read().get(nick) {
            return user.clone();
        }

        let created = {
            let mut users = self.users.write();
            // re-check: another thread may have inserted between the locks
            if let Some(user) = users.get(nick) {
                return user.clone();
            }
            let user = Arc::new(OnlineUser::new(nick, cid));
            users.insert(nick.to_string(), user.clone());
            user
        };

        if !created.cid.is_zero() {
            self.registry.put_online(created.cid, nick, &self.hub_url);
        }
        created
    }

    pub fn find(&self, nick: &str) -> Option<OnlineUserPtr> {
        self.users.read().get(nick).cloned()
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.users.read().contains_key(nick)
    }

    /// Remove `nick`, take its share out of the aggregate and deregister it.
    pub fn remove(&self, nick: &str) -> Option<OnlineUserPtr> {
        let removed = {
            let mut users = self.users.write();
            let user = users.remove(nick)?;
            let share = user.identity.read().bytes_shared;
            self.bytes_shared.fetch_sub(share, Ordering::SeqCst);
            user
        };
        if !removed.cid.is_zero() {
            self.registry.put_offline(removed.cid, &self.hub_url);
        }
        Some(removed)
    }

    /// Remove everyone; returns the number of users dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<OnlineUserPtr> = {
            let mut users = self.users.write();
            self.bytes_shared.store(0, Ordering::SeqCst);
            users.drain().map(|(_, u)| u).collect()
        };
        for user in &drained {
            if !user.cid.is_zero() {
                self.registry.put_offline(user.cid, &self.hub_url);
            }
        }
        drained.len()
    }

    /// Set a user's share and move the aggregate by the difference.
    pub fn change_bytes_shared(&self, user: &OnlineUser, bytes: i64) {
        let users = self.users.read();
        let bytes = bytes.max(0);
        let mut identity = user.identity.write();
        let delta = bytes - identity.bytes_shared;
        identity.bytes_shared = bytes;
        // only listed users count toward the aggregate
        if users.get(&user.nick).map_or(false, |u| std::ptr::eq(u.as_ref(), user)) {
            self.bytes_shared.fetch_add(delta, Ordering::SeqCst);
        }
    }

    pub fn bytes_shared(&self) -> i64 {
        self.bytes_shared.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    /// Snapshot of all users
    pub fn users(&self) -> Vec<OnlineUserPtr> {
        self.users.read().values().cloned().collect()
    }

    pub fn nicks(&self) -> Vec<String> {
        let mut nicks: Vec<String> = self.users.read().keys().cloned().collect();
        nicks.sort();
        nicks
    }

    /// `(normal, operators, bots)` currently listed
    pub fn counts(&self) -> (usize, usize, usize) {
        let users = self.users.read();
        let mut counts = (0, 0, 0);
        for user in users.values() {
            let flags = user.identity.read().flags;
            if flags.contains(UserFlags::BOT) {
                counts.2 += 1;
            } else if flags.contains(UserFlags::OPERATOR) {
                counts.1 += 1;
            } else {
                counts.0 += 1;
            }
        }
        counts
    }
}
