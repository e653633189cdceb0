//! Collaborators the session talks to but does not implement
//!
//! Peer sockets, TLS, UDP search replies and share lookups live outside the
//! hub engine. The session only needs the narrow call contracts below.

use crate::protocol::codec::escape;
use crate::protocol::search::SearchRequest;

/// Which side of a NAT-traversal handshake a connect belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatRole {
    /// Ordinary outbound connect
    Direct,
    /// We answered an `N` request
    Client,
    /// We received the `R` reply to our `N`
    Server,
}

/// Outbound peer connection the broker should open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnect {
    pub server: String,
    pub port: u16,
    /// Local port to bind, set for NAT traversal
    pub local_port: Option<u16>,
    pub role: NatRole,
    pub my_nick: String,
    pub hub_url: String,
    pub secure: bool,
}

/// Peer connection manager
pub trait ConnectionBroker: Send + Sync {
    /// Plain listening port, 0 when not listening
    fn port(&self) -> u16;
    /// TLS listening port, 0 when not listening
    fn secure_port(&self) -> u16;
    fn tls_ok(&self) -> bool;
    /// Whether inbound connections reach us
    fn is_active(&self) -> bool;
    /// Address announced in `$ConnectToMe`
    fn local_ip(&self) -> String;
    /// Register an expected inbound connection from `nick`.
    ///
    /// Returns false when the broker refuses (e.g. duplicate expectation).
    fn expect(&self, nick: &str, my_nick: &str, hub_url: &str, expires: u64) -> bool;
    fn connect(&self, request: PeerConnect);
    /// Local port to use for a NAT-traversal exchange, 0 when unavailable
    fn nat_port(&self) -> u16;
}

/// One share match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Share path with `\` separators
    pub path: String,
    pub size: u64,
    pub tth: String,
    pub is_directory: bool,
}

/// Share lookup and UDP reply channel
pub trait SearchResponder: Send + Sync {
    /// Up to `request.max_results` matches
    fn search(&self, request: &SearchRequest) -> Vec<SearchHit>;
    /// Local UDP port for active searches, 0 when unavailable
    fn udp_port(&self) -> u16;
    fn free_slots(&self) -> u16;
    fn send_udp(&self, ip: &str, port: u16, data: Vec<u8>);
    /// `$SR` relayed by the hub for one of our passive searches
    fn on_search_result(&self, line: &str);
}

/// `$SR <nick> <path>\x05<size> <free>/<slots>\x05TTH:<tth> (<hub>)`
pub fn render_result(
    hit: &SearchHit,
    my_nick: &str,
    free_slots: u16,
    slots: u16,
    hub_address: &str,
) -> String {
    let (nick, path, tth, hub) = (
        escape(my_nick),
        escape(&hit.path),
        escape(&hit.tth),
        escape(hub_address),
    );
    if hit.is_directory {
        format!(
            "$SR {} {} {}/{}\x05TTH:{} ({})",
            nick, path, free_slots, slots, tth, hub
        )
    } else {
        format!(
            "$SR {} {}\x05{} {}/{}\x05TTH:{} ({})",
            nick, path, hit.size, free_slots, slots, tth, hub
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_file_result() {
        let hit = SearchHit {
            path: "music\\song.mp3".into(),
            size: 4096,
            tth: "A".repeat(39),
            is_directory: false,
        };
        let line = render_result(&hit, "me", 2, 5, "hub.example:411");
        assert_eq!(
            line,
            format!("$SR me music\\song.mp3\x054096 2/5\x05TTH:{} (hub.example:411)", "A".repeat(39))
        );
    }

    #[test]
    fn test_render_directory_result() {
        let hit = SearchHit {
            path: "music".into(),
            size: 0,
            tth: "B".repeat(39),
            is_directory: true,
        };
        assert!(render_result(&hit, "me", 0, 1, "h:1").starts_with("$SR me music 0/1\x05TTH:"));
    }

    #[test]
    fn test_result_fields_escaped() {
        let hit = SearchHit {
            path: "odd|name$.txt".into(),
            size: 7,
            tth: "C".repeat(39),
            is_directory: false,
        };
        let line = render_result(&hit, "me", 1, 1, "hub|x:411");
        assert!(!line.contains('|'));
        assert!(line.starts_with("$SR me odd&#124;name&#36;.txt\x057 1/1"));
        assert!(line.ends_with("(hub&#124;x:411)"));
    }
}
