//! Peer connection negotiation
//!
//! `$ConnectToMe` / `$RevConnectToMe` exchange, including the two-step NAT
//! traversal handshake: an `N` request makes the receiver bind a local port
//! and answer with `R`; the original sender then connects from its own
//! pending port. Only one NAT partner is pending per session at a time.

use crate::hub::services::{NatRole, PeerConnect};
use crate::hub::session::{HubSession, PendingNat, State, EXPECT_TIMEOUT_MS, NAT_PENDING_MS};
use crate::protocol::command::{ConnectRequest, NatFlag, OutCommand};
use crate::users::{OnlineUserPtr, UserFlags};
use log::{debug, info, warn};
use std::net::IpAddr;

impl HubSession {
    /// Ask `nick` for a peer connection, actively or passively.
    ///
    /// Returns false when the user is unknown or nothing was sent.
    pub fn connect_to(&self, nick: &str, now: u64) -> bool {
        let Some(user) = self.directory.find(nick) else {
            debug!("{}: connect to unknown user {}", self.hub_url, nick);
            return false;
        };
        if self.broker.is_active() {
            self.initiate_active(&user, now)
        } else {
            self.initiate_passive(&user)
        }
    }

    /// `$ConnectToMe <nick> <our ip>:<port>[S]`
    pub fn initiate_active(&self, user: &OnlineUserPtr, now: u64) -> bool {
        let Some(my_nick) = self.normal_nick() else {
            return false;
        };
        let secure = self.broker.tls_ok() && user.has_flag(UserFlags::TLS);
        let port = if secure {
            self.broker.secure_port()
        } else {
            self.broker.port()
        };
        if port == 0 {
            warn!("{}: not listening, cannot connect to {}", self.hub_url, user.nick());
            return false;
        }
        if !self
            .broker
            .expect(user.nick(), &my_nick, &self.hub_url, now + EXPECT_TIMEOUT_MS)
        {
            debug!("{}: connection from {} already expected", self.hub_url, user.nick());
        }
        self.send(OutCommand::ConnectToMe {
            target: user.nick().to_string(),
            address: self.broker.local_ip(),
            port,
            nat: NatFlag::None,
            secure,
            sender: None,
        });
        true
    }

    /// `$RevConnectToMe <me> <nick>`
    pub fn initiate_passive(&self, user: &OnlineUserPtr) -> bool {
        let Some(my_nick) = self.normal_nick() else {
            return false;
        };
        self.send(OutCommand::RevConnectToMe {
            from: my_nick,
            to: user.nick().to_string(),
        });
        true
    }

    /// Serve an inbound `$ConnectToMe`.
    pub fn handle_incoming_connect_request(&self, req: ConnectRequest, now: u64) {
        let Some(my_nick) = self.normal_nick() else {
            return;
        };
        let Ok(ip) = req.server.parse::<IpAddr>() else {
            debug!("{}: $ConnectToMe with non-IP address {}", self.hub_url, req.server);
            return;
        };
        let verdict = self
            .connect_guard
            .record_request(ip, req.port, now, &self.hub_url);
        if !verdict.allowed {
            self.flood_notice(verdict, &format!("$ConnectToMe from {}:{}", ip, req.port));
            return;
        }
        let secure = req.secure && self.broker.tls_ok();

        match req.nat {
            NatFlag::None => self.broker.connect(PeerConnect {
                server: req.server,
                port: req.port,
                local_port: None,
                role: NatRole::Direct,
                my_nick,
                hub_url: self.hub_url.clone(),
                secure,
            }),
            NatFlag::Nat => {
                if !self.config.allow_nat_traversal {
                    return;
                }
                let Some(sender) = req.sender else {
                    return;
                };
                let Some(local_port) = self.reserve_nat(&sender, now) else {
                    return;
                };
                self.broker.connect(PeerConnect {
                    server: req.server,
                    port: req.port,
                    local_port: Some(local_port),
                    role: NatRole::Client,
                    my_nick,
                    hub_url: self.hub_url.clone(),
                    secure,
                });
                self.send(OutCommand::ConnectToMe {
                    target: sender,
                    address: self.broker.local_ip(),
                    port: local_port,
                    nat: NatFlag::Reply,
                    secure,
                    sender: None,
                });
            }
            NatFlag::Reply => {
                let pending = {
                    let mut st = self.state.lock();
                    let matches = st.pending_nat.as_ref().map_or(false, |p| {
                        now <= p.expires
                            && req.sender.as_deref().map_or(true, |s| s == p.nick)
                    });
                    if matches {
                        st.pending_nat.take()
                    } else {
                        None
                    }
                };
                let Some(pending) = pending else {
                    debug!(
                        "{}: NAT reply from {}:{} without a pending partner",
                        self.hub_url, req.server, req.port
                    );
                    return;
                };
                info!("{}: NAT traversal with {}", self.hub_url, pending.nick);
                self.broker.connect(PeerConnect {
                    server: req.server,
                    port: req.port,
                    local_port: Some(pending.local_port),
                    role: NatRole::Server,
                    my_nick,
                    hub_url: self.hub_url.clone(),
                    secure,
                });
            }
        }
    }

    /// Serve an inbound `$RevConnectToMe` from `from`.
    pub fn handle_incoming_rev_connect(&self, from: &str, now: u64) {
        let Some(my_nick) = self.normal_nick() else {
            return;
        };
        let Some(user) = self.directory.find(from) else {
            debug!("{}: $RevConnectToMe from unknown user {}", self.hub_url, from);
            return;
        };
        user.update(|id| id.set_flag(UserFlags::PASSIVE, true));

        if self.broker.is_active() {
            self.initiate_active(&user, now);
            return;
        }

        if self.config.allow_nat_traversal && user.has_flag(UserFlags::NAT_TRAVERSAL) {
            let Some(local_port) = self.reserve_nat(from, now) else {
                return;
            };
            let secure = self.broker.tls_ok() && user.has_flag(UserFlags::TLS);
            self.send(OutCommand::ConnectToMe {
                target: from.to_string(),
                address: self.broker.local_ip(),
                port: local_port,
                nat: NatFlag::Nat,
                secure,
                sender: Some(my_nick),
            });
            return;
        }

        // both sides passive: bounce the request once so the peer learns it
        let first = self.state.lock().mirrored.insert(from.to_string());
        if first {
            self.send(OutCommand::RevConnectToMe {
                from: my_nick,
                to: from.to_string(),
            });
        } else {
            debug!("{}: {} is passive too, not mirroring again", self.hub_url, from);
        }
    }

    /// Record `nick` as the pending NAT partner and return the local port.
    ///
    /// Fails while a different partner is still pending.
    fn reserve_nat(&self, nick: &str, now: u64) -> Option<u16> {
        {
            let st = self.state.lock();
            if let Some(p) = &st.pending_nat {
                if p.nick != nick && now <= p.expires {
                    debug!(
                        "{}: NAT request from {} rejected, {} still pending",
                        self.hub_url, nick, p.nick
                    );
                    return None;
                }
            }
        }
        let local_port = self.broker.nat_port();
        if local_port == 0 {
            warn!("{}: no local port for NAT traversal", self.hub_url);
            return None;
        }
        let mut st = self.state.lock();
        if st.state != State::Normal || st.closed {
            return None;
        }
        if let Some(p) = &st.pending_nat {
            if p.nick != nick && now <= p.expires {
                return None;
            }
        }
        st.pending_nat = Some(PendingNat {
            nick: nick.to_string(),
            local_port,
            expires: now + NAT_PENDING_MS,
        });
        Some(local_port)
    }
}

#[cfg(test)]
mod tests {
    use crate::hub::events::HubEvent;
    use crate::hub::services::NatRole;
    use crate::hub::session::NAT_PENDING_MS;
    use crate::hub::testing::Harness;

    const ACTIVE_BOB: &str = "$MyINFO $ALL bob x<++ V:1,M:A,H:1/0/0,S:2>$ $100\x01$$0$";
    const PASSIVE_BOB: &str = "$MyINFO $ALL bob x<++ V:1,M:P,H:1/0/0,S:2>$ $100\x01$$0$";
    const NAT_BOB: &str = "$MyINFO $ALL bob x<++ V:1,M:P,H:1/0/0,S:2>$ $100!$$0$";

    #[test]
    fn test_connect_to_active() {
        let mut h = Harness::active("me");
        h.login(1);
        h.feed(ACTIVE_BOB, 2);
        h.sent();

        assert!(h.session.connect_to("bob", 10));
        assert_eq!(h.sent(), vec!["$ConnectToMe bob 10.0.0.1:4000".to_string()]);
        assert_eq!(*h.broker.expected.lock(), vec!["bob".to_string()]);
        assert!(!h.session.connect_to("nobody", 10));
    }

    #[test]
    fn test_connect_to_passive() {
        let mut h = Harness::passive("me");
        h.login(1);
        h.feed(ACTIVE_BOB, 2);
        h.sent();

        assert!(h.session.connect_to("bob", 10));
        assert_eq!(h.sent(), vec!["$RevConnectToMe me bob".to_string()]);
        assert!(h.broker.expected.lock().is_empty());
    }

    #[test]
    fn test_connect_requires_login() {
        let mut h = Harness::active("me");
        h.session.on_connected();
        h.feed("$ConnectToMe me 1.2.3.4:5555", 1);
        assert!(h.broker.connects.lock().is_empty());
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_incoming_direct_connect() {
        let mut h = Harness::active("me");
        h.login(1);
        h.feed("$ConnectToMe me 1.2.3.4:5555", 2);
        h.feed("$ConnectToMe me host.example:5555", 3);
        h.feed("$ConnectToMe me 1.2.3.4:0", 4);

        let connects = h.broker.connects.lock();
        assert_eq!(connects.len(), 1);
        assert_eq!(connects[0].server, "1.2.3.4");
        assert_eq!(connects[0].port, 5555);
        assert_eq!(connects[0].role, NatRole::Direct);
        assert_eq!(connects[0].local_port, None);
        assert_eq!(connects[0].my_nick, "me");
    }

    #[test]
    fn test_nat_request_answered_once_pending() {
        let mut h = Harness::passive("me");
        h.login(1_000);
        h.feed("$ConnectToMe me 1.2.3.4:6000N bob", 1_000);

        assert_eq!(h.sent(), vec!["$ConnectToMe bob 10.0.0.1:5000R".to_string()]);
        {
            let connects = h.broker.connects.lock();
            assert_eq!(connects.len(), 1);
            assert_eq!(connects[0].role, NatRole::Client);
            assert_eq!(connects[0].local_port, Some(5000));
        }
        let pending = h.session.pending_nat().unwrap();
        assert_eq!(pending.nick, "bob");
        assert_eq!(pending.expires, 1_000 + NAT_PENDING_MS);

        // a second partner is rejected while bob is pending
        h.feed("$ConnectToMe me 5.6.7.8:6001N carol", 2_000);
        assert!(h.sent().is_empty());
        assert_eq!(h.broker.connects.lock().len(), 1);

        // expiry frees the slot
        h.session.on_tick(1_000 + NAT_PENDING_MS + 1);
        assert!(h.session.pending_nat().is_none());
        h.feed("$ConnectToMe me 5.6.7.8:6001N carol", 70_000);
        assert_eq!(h.sent(), vec!["$ConnectToMe carol 10.0.0.1:5000R".to_string()]);
    }

    #[test]
    fn test_nat_request_without_sender_dropped() {
        let mut h = Harness::passive("me");
        h.login(1);
        h.feed("$ConnectToMe me 1.2.3.4:6000N", 2);
        assert!(h.sent().is_empty());
        assert!(h.session.pending_nat().is_none());
    }

    #[test]
    fn test_nat_handshake_from_rev_connect() {
        let mut h = Harness::passive("me");
        h.login(1_000);
        h.feed(NAT_BOB, 1_000);
        h.sent();

        h.feed("$RevConnectToMe bob me", 2_000);
        assert_eq!(h.sent(), vec!["$ConnectToMe bob 10.0.0.1:5000N me".to_string()]);
        assert_eq!(h.session.pending_nat().unwrap().nick, "bob");

        // reply from someone else does not consume the entry
        h.feed("$ConnectToMe me 9.9.9.9:7000R carol", 2_500);
        assert!(h.broker.connects.lock().is_empty());

        h.feed("$ConnectToMe me 1.2.3.4:7000R bob", 3_000);
        {
            let connects = h.broker.connects.lock();
            assert_eq!(connects.len(), 1);
            assert_eq!(connects[0].role, NatRole::Server);
            assert_eq!(connects[0].local_port, Some(5000));
            assert_eq!(connects[0].port, 7000);
        }
        assert!(h.session.pending_nat().is_none());

        // consumed: a replayed reply is dropped
        h.feed("$ConnectToMe me 1.2.3.4:7000R bob", 3_500);
        assert_eq!(h.broker.connects.lock().len(), 1);
    }

    #[test]
    fn test_expired_nat_reply_dropped() {
        let mut h = Harness::passive("me");
        h.login(1_000);
        h.feed(NAT_BOB, 1_000);
        h.feed("$RevConnectToMe bob me", 1_000);
        h.feed("$ConnectToMe me 1.2.3.4:7000R bob", 1_000 + NAT_PENDING_MS + 1);
        assert!(h.broker.connects.lock().is_empty());
    }

    #[test]
    fn test_teardown_releases_nat_partner() {
        let mut h = Harness::passive("me");
        h.login(1_000);
        h.feed("$ConnectToMe me 1.2.3.4:6000N bob", 1_000);
        assert!(h.session.pending_nat().is_some());
        h.session.disconnect();
        assert!(h.session.pending_nat().is_none());
    }

    #[test]
    fn test_mutual_passive_mirrored_once() {
        let mut h = Harness::passive("me");
        h.login(1);
        h.feed(PASSIVE_BOB, 2);
        h.sent();

        h.feed("$RevConnectToMe bob me", 3);
        h.feed("$RevConnectToMe bob me", 4);
        assert_eq!(h.sent(), vec!["$RevConnectToMe me bob".to_string()]);

        // forgotten once bob leaves
        h.feed("$Quit bob", 5);
        h.feed(PASSIVE_BOB, 6);
        h.feed("$RevConnectToMe bob me", 7);
        assert_eq!(h.sent(), vec!["$RevConnectToMe me bob".to_string()]);
    }

    #[test]
    fn test_rev_connect_when_active() {
        let mut h = Harness::active("me");
        h.login(1);
        h.feed(PASSIVE_BOB, 2);
        h.sent();

        h.feed("$RevConnectToMe bob me", 3);
        assert_eq!(h.sent(), vec!["$ConnectToMe bob 10.0.0.1:4000".to_string()]);
        h.feed("$RevConnectToMe stranger me", 4);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_connect_flood_banned() {
        let mut h = Harness::active("me");
        h.login(1_000);
        h.events();
        for i in 0..12 {
            h.feed("$ConnectToMe me 6.6.6.6:4444", 2_000 + i);
        }
        // five requests within a few ms exceed ten per minute
        assert_eq!(h.broker.connects.lock().len(), 4);
        let floods = h
            .events()
            .into_iter()
            .filter(|e| matches!(e, HubEvent::FloodDetected(_)))
            .count();
        assert_eq!(floods, 1);
        assert!(!h.context.tcp_bans.is_empty());
    }
}
