//! Per-hub user identity

use crate::protocol::myinfo::{MyInfo, NmdcStatus};
use bitflags::bitflags;
use std::net::IpAddr;

bitflags! {
    /// What we know about a user on one hub
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UserFlags: u16 {
        const OPERATOR = 0x0001;
        const BOT = 0x0002;
        /// Cannot accept inbound connections
        const PASSIVE = 0x0004;
        /// Announced NAT traversal support
        const NAT_TRAVERSAL = 0x0008;
        const TLS = 0x0010;
        const AWAY = 0x0020;
        /// Server or fireball uploader
        const FAST = 0x0040;
        /// At least one `$MyINFO` seen
        const HAS_INFO = 0x0080;
    }
}

/// Fields reported for one user on one hub
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub nick: String,
    pub description: String,
    pub email: String,
    pub connection: String,
    pub client: Option<String>,
    pub version: Option<String>,
    pub slots: u16,
    /// Upload limit in bytes per second, 0 when unlimited
    pub limit: u32,
    pub hubs: (u32, u32, u32),
    pub bytes_shared: i64,
    pub ip: Option<IpAddr>,
    pub flags: UserFlags,
}

impl Identity {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            ..Default::default()
        }
    }

    pub fn is_op(&self) -> bool {
        self.flags.contains(UserFlags::OPERATOR)
    }

    pub fn is_bot(&self) -> bool {
        self.flags.contains(UserFlags::BOT)
    }

    pub fn is_passive(&self) -> bool {
        self.flags.contains(UserFlags::PASSIVE)
    }

    pub fn set_flag(&mut self, flag: UserFlags, on: bool) {
        self.flags.set(flag, on);
    }

    /// Copy presence fields from a parsed `$MyINFO`.
    ///
    /// Share size is not touched; it goes through the directory so the
    /// aggregate stays consistent.
    pub fn apply_myinfo(&mut self, info: &MyInfo) {
        self.description = info.description.clone();
        self.email = info.email.clone();
        self.connection = info.connection.clone();
        self.flags.insert(UserFlags::HAS_INFO);

        self.limit = 0;
        if let Some(tag) = &info.tag {
            if tag.application.is_some() {
                self.client = tag.application.clone();
            }
            if tag.version.is_some() {
                self.version = tag.version.clone();
            }
            if let Some(hubs) = tag.hubs {
                self.hubs = hubs;
            }
            if let Some(slots) = tag.slots {
                self.slots = slots;
            }
            self.limit = tag.limit;
            if let Some(active) = tag.is_active() {
                self.flags.set(UserFlags::PASSIVE, !active);
            }
        } else if let Some(mode) = info.legacy_mode {
            self.flags.set(UserFlags::PASSIVE, mode == 'P');
        }

        let status = info.status;
        self.flags.set(UserFlags::AWAY, status.contains(NmdcStatus::AWAY));
        self.flags.set(UserFlags::TLS, status.contains(NmdcStatus::TLS));
        self.flags.set(UserFlags::NAT_TRAVERSAL, status.contains(NmdcStatus::NAT0));
        self.flags.set(
            UserFlags::FAST,
            status.intersects(NmdcStatus::SERVER | NmdcStatus::FIREBALL),
        );
    }
}
