//! Inbound search answering and outgoing searches

use crate::hub::services::render_result;
use crate::hub::session::{HubSession, HubSupports, State};
use crate::protocol::command::OutCommand;
use crate::protocol::search::{SearchKind, SearchMode, SearchQuery, SearchRequest, Seeker};
use crate::users::UserFlags;
use log::{debug, warn};
use std::net::IpAddr;

impl HubSession {
    /// Answer an inbound `$Search`, `$SA` or `$SP`.
    pub fn handle_incoming_search(&self, kind: SearchKind, param: &str, now: u64) {
        if self.config.hide_share {
            return;
        }
        let Some(my_nick) = self.normal_nick() else {
            return;
        };
        let Some(req) = SearchRequest::parse(kind, param) else {
            debug!("{}: bad search {}", self.hub_url, param);
            return;
        };

        let active = self.broker.is_active();
        let udp_port = self.responder.udp_port();
        let my_addr = (active && udp_port != 0)
            .then(|| format!("{}:{}", self.broker.local_ip(), udp_port));
        if req.is_own(&my_nick, my_addr.as_deref()) {
            return;
        }
        if self.config.incoming_search_tth_only && !req.is_tth() {
            return;
        }

        match req.mode {
            SearchMode::Active => {
                let Some((ip, port)) = req.active_addr() else {
                    return;
                };
                let Ok(ip) = ip.parse::<IpAddr>() else {
                    debug!("{}: search from non-IP seeker {}", self.hub_url, req.seeker);
                    return;
                };
                let verdict = self.search_guard.record_request(ip, port, now, &self.hub_url);
                if !verdict.allowed {
                    self.flood_notice(verdict, &format!("$Search from {}:{}", ip, port));
                    return;
                }
            }
            SearchMode::Passive => {
                let Some(nick) = req.passive_nick() else {
                    return;
                };
                let Some(user) = self.directory.find(nick) else {
                    return;
                };
                user.update(|id| id.set_flag(UserFlags::PASSIVE, true));
                // two passive peers can only meet through NAT traversal
                if !active
                    && !(self.config.allow_nat_traversal
                        && user.has_flag(UserFlags::NAT_TRAVERSAL))
                {
                    return;
                }
            }
        }

        let hits = self.responder.search(&req);
        if hits.is_empty() {
            return;
        }
        let free_slots = self.responder.free_slots();
        let hub_address = self.config.socket_address();
        for hit in hits.iter().take(req.max_results) {
            let line = render_result(hit, &my_nick, free_slots, self.config.slots, &hub_address);
            match req.mode {
                SearchMode::Passive => {
                    let nick = req.passive_nick().unwrap_or_default();
                    self.send(OutCommand::Raw(format!("{}\x05{}", line, nick).into_bytes()));
                }
                SearchMode::Active => {
                    if let Some((ip, port)) = req.active_addr() {
                        self.responder.send_udp(ip, port, line.into_bytes());
                    }
                }
            }
        }
    }

    /// Send a search to the hub.
    ///
    /// `mode` of `None` picks active when reachable over UDP. Returns false
    /// when not logged in, the hub's search interval has not passed or a
    /// hash lookup does not carry a well-formed TTH.
    pub fn search(&self, query: &SearchQuery, mode: Option<SearchMode>, now: u64) -> bool {
        if !query.is_valid() {
            warn!("{}: search dropped, malformed TTH {:?}", self.hub_url, query.filter);
            return false;
        }
        let udp_port = self.responder.udp_port();
        let mode = match mode {
            Some(SearchMode::Active) if udp_port != 0 => SearchMode::Active,
            Some(_) => SearchMode::Passive,
            None if self.broker.is_active() && udp_port != 0 => SearchMode::Active,
            None => SearchMode::Passive,
        };

        let (my_nick, tths) = {
            let mut st = self.state.lock();
            if st.state != State::Normal || st.closed {
                return false;
            }
            let interval = match mode {
                SearchMode::Passive => st.search_interval_passive_ms,
                SearchMode::Active => st.search_interval_ms,
            };
            if st.last_search != 0 && now.saturating_sub(st.last_search) < interval {
                warn!(
                    "{}: search dropped, hub allows one every {} ms",
                    self.hub_url, interval
                );
                return false;
            }
            st.last_search = now;
            (st.my_nick.clone(), st.supports.contains(HubSupports::TTHS))
        };

        let seeker = match mode {
            SearchMode::Active => Seeker::Active(format!("{}:{}", self.broker.local_ip(), udp_port)),
            SearchMode::Passive => Seeker::Passive(my_nick),
        };
        self.send(OutCommand::Raw(query.render(&seeker, tths).into_bytes()));
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::hub::services::SearchHit;
    use crate::hub::testing::{config, FakeBroker, FakeResponder, Harness};
    use crate::protocol::search::{SearchMode, SearchQuery, SizeMode, FILE_TYPE_ANY, FILE_TYPE_TTH};

    const TTH: &str = "LWPNACQDBZRYXW3VHJVCJ64QBZNGHOHHHZWCLNQ";
    const BOB: &str = "$MyINFO $ALL bob x<++ V:1,M:P,H:1/0/0,S:2>$ $100\x01$$0$";
    const NAT_BOB: &str = "$MyINFO $ALL bob x<++ V:1,M:P,H:1/0/0,S:2>$ $100!$$0$";

    fn hit() -> SearchHit {
        SearchHit {
            path: "music\\song.mp3".to_string(),
            size: 4096,
            tth: TTH.to_string(),
            is_directory: false,
        }
    }

    fn sharing(active: bool) -> Harness {
        let udp_port = if active { 4002 } else { 0 };
        Harness::new(
            config("me"),
            FakeBroker::new(active),
            FakeResponder::new(udp_port, vec![hit()]),
        )
    }

    fn query(filter: &str) -> SearchQuery {
        SearchQuery {
            filter: filter.to_string(),
            size: None,
            file_type: FILE_TYPE_ANY,
        }
    }

    #[test]
    fn test_passive_seeker_answered_through_hub() {
        let mut h = sharing(true);
        h.login(1);
        h.feed(BOB, 2);
        h.sent();

        h.feed("$Search Hub:bob F?T?0?1?song", 3);
        assert_eq!(
            h.sent(),
            vec![format!(
                "$SR me music\\song.mp3\x054096 2/3\x05TTH:{} (hub.example:411)\x05bob",
                TTH
            )]
        );
        let searches = h.responder.searches.lock();
        assert_eq!(searches[0].filter, "song");
        assert_eq!(searches[0].max_results, 5);
    }

    #[test]
    fn test_active_seeker_answered_over_udp() {
        let mut h = sharing(true);
        h.login(1);
        h.feed("$Search 1.2.3.4:412 T?F?100?1?song", 2);
        assert!(h.sent().is_empty());

        let udp = h.responder.udp.lock();
        assert_eq!(udp.len(), 1);
        assert_eq!(udp[0].0, "1.2.3.4");
        assert_eq!(udp[0].1, 412);
        assert!(udp[0].2.starts_with("$SR me music\\song.mp3\x054096 2/3"));

        let searches = h.responder.searches.lock();
        assert_eq!(searches[0].size_mode, SizeMode::AtLeast);
        assert_eq!(searches[0].size, 100);
    }

    #[test]
    fn test_own_searches_ignored() {
        let mut h = sharing(true);
        h.login(1);
        h.feed("$Search 10.0.0.1:4002 F?T?0?1?song", 2);
        h.feed("$Search Hub:me F?T?0?1?song", 3);
        assert!(h.responder.searches.lock().is_empty());
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_passive_pair_needs_nat() {
        let mut h = sharing(false);
        h.login(1);
        h.feed(BOB, 2);
        h.sent();
        h.feed("$Search Hub:bob F?T?0?1?song", 3);
        assert!(h.sent().is_empty());

        h.feed(NAT_BOB, 4);
        h.feed("$Search Hub:bob F?T?0?1?song", 5);
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn test_unknown_passive_seeker_ignored() {
        let mut h = sharing(true);
        h.login(1);
        h.feed("$Search Hub:ghost F?T?0?1?song", 2);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_hidden_share_never_answers() {
        let mut cfg = config("me");
        cfg.hide_share = true;
        let mut h = Harness::new(cfg, FakeBroker::new(true), FakeResponder::new(4002, vec![hit()]));
        h.login(1);
        h.feed("$Search 1.2.3.4:412 F?T?0?1?song", 2);
        assert!(h.responder.searches.lock().is_empty());
    }

    #[test]
    fn test_tth_only_filter() {
        let mut cfg = config("me");
        cfg.incoming_search_tth_only = true;
        let mut h = Harness::new(cfg, FakeBroker::new(true), FakeResponder::new(4002, vec![hit()]));
        h.login(1);
        h.feed("$Search 1.2.3.4:412 F?T?0?1?song", 2);
        assert!(h.responder.searches.lock().is_empty());

        h.feed(&format!("$SA {} 1.2.3.4:412", TTH), 3);
        let searches = h.responder.searches.lock();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].filter, format!("TTH:{}", TTH));
    }

    #[test]
    fn test_search_flood_banned() {
        let mut h = sharing(true);
        h.login(1);
        for i in 0..10 {
            h.feed("$Search 7.7.7.7:412 F?T?0?1?song", 100 + i);
        }
        assert_eq!(h.responder.udp.lock().len(), 4);
        assert!(!h.context.udp_bans.is_empty());
        assert!(h.context.tcp_bans.is_empty());
    }

    #[test]
    fn test_outgoing_search() {
        let mut h = sharing(true);
        assert!(!h.session.search(&query("foo bar"), None, 5_000));
        h.login(1);

        assert!(h.session.search(&query("foo bar"), None, 10_000));
        assert_eq!(
            h.sent(),
            vec!["$Search 10.0.0.1:4002 F?T?0?1?foo$bar".to_string()]
        );

        // inside the hub's interval
        assert!(!h.session.search(&query("again"), None, 11_000));
        assert!(h.sent().is_empty());

        assert!(h
            .session
            .search(&query("again"), Some(SearchMode::Passive), 12_000));
        assert_eq!(h.sent(), vec!["$Search Hub:me F?T?0?1?again".to_string()]);
    }

    #[test]
    fn test_outgoing_search_without_udp_is_passive() {
        let mut h = Harness::new(config("me"), FakeBroker::new(true), FakeResponder::new(0, Vec::new()));
        h.login(1);
        assert!(h.session.search(&query("x"), Some(SearchMode::Active), 10_000));
        assert_eq!(h.sent(), vec!["$Search Hub:me F?T?0?1?x".to_string()]);
    }

    #[test]
    fn test_outgoing_tth_search() {
        let mut h = sharing(true);
        h.login(1);
        let tth = SearchQuery {
            filter: TTH.to_string(),
            size: None,
            file_type: FILE_TYPE_TTH,
        };
        assert!(h.session.search(&tth, None, 10_000));
        assert_eq!(
            h.sent(),
            vec![format!("$Search 10.0.0.1:4002 F?T?0?9?TTH:{}", TTH)]
        );

        h.feed("$Supports TTHS", 11_000);
        assert!(h.session.search(&tth, None, 20_000));
        assert_eq!(h.sent(), vec![format!("$SA {} 10.0.0.1:4002", TTH)]);
    }

    #[test]
    fn test_malformed_tth_search_rejected() {
        let mut h = sharing(true);
        h.login(1);
        let bad = SearchQuery {
            filter: "bad|tth $x".to_string(),
            size: None,
            file_type: FILE_TYPE_TTH,
        };
        assert!(!h.session.search(&bad, None, 100_000));
        assert!(h.sent().is_empty());

        // a rejected query does not consume the interval
        assert!(h.session.search(&query("ok"), None, 100_000));
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn test_text_search_with_separators_escaped() {
        let mut h = sharing(true);
        h.login(1);
        assert!(h.session.search(&query("a|b $c"), None, 10_000));
        let sent = h.sent();
        assert_eq!(sent, vec!["$Search 10.0.0.1:4002 F?T?0?1?a&#124;b$&#36;c".to_string()]);
    }
}
