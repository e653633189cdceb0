//! Own `$MyINFO` announcements
//!
//! Updates are rate-limited to one per configured interval. A change that
//! arrives early is remembered as a pending update and flushed by
//! [`HubSession::on_tick`] once the interval has passed. Identical content
//! is never re-sent.

use crate::hub::session::{HubSession, State};
use crate::protocol::command::OutCommand;
use crate::protocol::myinfo::{NmdcStatus, OwnInfo};
use log::debug;

impl HubSession {
    /// Announce our presence.
    ///
    /// `always` skips the rate limit (used right after login);
    /// `force_passive` announces passive mode regardless of reachability.
    pub fn update_info(&self, always: bool, force_passive: bool, now: u64) {
        let interval = self.config.myinfo_interval_ms();
        let snapshot = {
            let mut st = self.state.lock();
            if let Some(last) = st.last_update {
                let next_update = last.saturating_add(interval);
                if !force_passive && !always && next_update > now {
                    if st.pending_update.is_none() {
                        st.pending_update = Some(next_update);
                    }
                    return;
                }
            }
            if st.state != State::Normal || st.closed {
                return;
            }
            st.pending_update = None;
            (
                st.my_nick.clone(),
                st.description.clone(),
                st.share_bytes,
                st.away,
            )
        };
        let (nick, description, share, away) = snapshot;

        let active = !force_passive && self.broker.is_active();
        let mut status = NmdcStatus::NORMAL;
        if away {
            status |= NmdcStatus::AWAY;
        }
        if self.config.allow_nat_traversal && !active {
            status |= NmdcStatus::NAT0;
        }
        if self.broker.tls_ok() {
            status |= NmdcStatus::TLS;
        }

        let info = OwnInfo {
            nick,
            description,
            client_name: self.config.client_name.clone(),
            client_version: self.config.client_version.clone(),
            active,
            hubs: self.context.hub_counts(),
            slots: self.config.slots,
            speed: self.config.speed.clone(),
            status,
            email: self.config.email.clone(),
            share: if self.config.hide_share { 0 } else { share },
        };
        let rendered = info.render();

        let changed = {
            let mut st = self.state.lock();
            let changed = st.last_myinfo != rendered;
            if changed {
                st.last_myinfo = rendered.clone();
                st.last_update = Some(now);
                st.last_mode = Some(if active { 'A' } else { 'P' });
            }
            changed
        };
        if changed {
            self.send(OutCommand::Raw(rendered.into_bytes()));
        } else {
            debug!("{}: presence unchanged", self.hub_url);
        }
    }

    /// Re-announce as passive unless already passive; false when nothing to do.
    pub fn resend_passive(&self, now: u64) -> bool {
        if self.state.lock().last_mode == Some('P') {
            return false;
        }
        self.update_info(false, true, now);
        true
    }

    pub fn set_away(&self, away: bool, now: u64) {
        self.state.lock().away = away;
        self.update_info(false, false, now);
    }

    pub fn set_description(&self, description: &str, now: u64) {
        self.state.lock().description = description.to_string();
        self.update_info(false, false, now);
    }

    pub fn set_share(&self, bytes: i64, now: u64) {
        self.state.lock().share_bytes = bytes.max(0);
        self.update_info(false, false, now);
    }

    /// Due time of a deferred presence update
    pub fn pending_update(&self) -> Option<u64> {
        self.state.lock().pending_update
    }
}
