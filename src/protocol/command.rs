//! Outgoing command rendering and connect-request parsing
//!
//! Every command the session emits is built here, so parameter escaping lives
//! in one place. Rendered lines carry no trailing `|`; the stream codec adds it.

use crate::protocol::codec::escape;
use std::fmt;

// =============================================================================
// Connect requests
// =============================================================================

/// NAT-traversal marker carried on a `$ConnectToMe` port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatFlag {
    /// Plain request
    None,
    /// `N`: first half, the sender wants a reflected connection
    Nat,
    /// `R`: reply half, answering an earlier `N`
    Reply,
}

/// Parsed `$ConnectToMe <target> <ip>:<port>[N|R][S] [<sender>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Nick the request is addressed to (normally us)
    pub target: String,
    /// Address to connect to
    pub server: String,
    pub port: u16,
    /// `S` suffix: peer wants TLS
    pub secure: bool,
    pub nat: NatFlag,
    /// Trailing sender nick, present on NAT requests
    pub sender: Option<String>,
}

impl ConnectRequest {
    /// Parse the parameter of an inbound `$ConnectToMe`.
    pub fn parse(param: &str) -> Option<Self> {
        let (target, rest) = param.split_once(' ')?;
        if rest.is_empty() {
            return None;
        }
        let (addr, sender) = match rest.split_once(' ') {
            Some((addr, sender)) if !sender.is_empty() => (addr, Some(sender.to_string())),
            Some((addr, _)) => (addr, None),
            None => (rest, None),
        };
        let (server, mut port) = addr.rsplit_once(':')?;
        if server.is_empty() {
            return None;
        }

        let mut secure = false;
        if let Some(p) = port.strip_suffix('S') {
            secure = true;
            port = p;
        }
        let mut nat = NatFlag::None;
        if let Some(p) = port.strip_suffix('N') {
            nat = NatFlag::Nat;
            port = p;
        } else if let Some(p) = port.strip_suffix('R') {
            nat = NatFlag::Reply;
            port = p;
        }
        let port: u16 = port.parse().ok()?;
        if port == 0 {
            return None;
        }

        Some(Self {
            target: target.to_string(),
            server: server.to_string(),
            port,
            secure,
            nat,
            sender,
        })
    }
}

// =============================================================================
// Outgoing commands
// =============================================================================

/// Commands the session sends to the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutCommand {
    Supports(Vec<&'static str>),
    /// Raw key bytes from the handshake cipher
    Key(Vec<u8>),
    ValidateNick(String),
    Version,
    GetNickList,
    GetInfo { nick: String, my_nick: String },
    MyPass(String),
    MyHubUrl(String),
    ConnectToMe {
        target: String,
        address: String,
        port: u16,
        nat: NatFlag,
        secure: bool,
        sender: Option<String>,
    },
    RevConnectToMe { from: String, to: String },
    Chat { nick: String, text: String },
    PrivateMessage { to: String, from: String, text: String },
    /// Pre-rendered line (presence, searches, results)
    Raw(Vec<u8>),
}

impl OutCommand {
    /// Serialize to wire bytes (without the trailing `|`).
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            OutCommand::Key(key) => {
                let mut out = b"$Key ".to_vec();
                out.extend_from_slice(key);
                out
            }
            OutCommand::Raw(bytes) => bytes.clone(),
            other => other.to_string().into_bytes(),
        }
    }

    /// Short name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            OutCommand::Supports(_) => "Supports",
            OutCommand::Key(_) => "Key",
            OutCommand::ValidateNick(_) => "ValidateNick",
            OutCommand::Version => "Version",
            OutCommand::GetNickList => "GetNickList",
            OutCommand::GetInfo { .. } => "GetINFO",
            OutCommand::MyPass(_) => "MyPass",
            OutCommand::MyHubUrl(_) => "MyHubURL",
            OutCommand::ConnectToMe { .. } => "ConnectToMe",
            OutCommand::RevConnectToMe { .. } => "RevConnectToMe",
            OutCommand::Chat { .. } => "Chat",
            OutCommand::PrivateMessage { .. } => "To",
            OutCommand::Raw(_) => "Raw",
        }
    }
}

impl fmt::Display for OutCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutCommand::Supports(features) => write!(f, "$Supports {}", features.join(" ")),
            OutCommand::Key(key) => write!(f, "$Key {}", String::from_utf8_lossy(key)),
            OutCommand::ValidateNick(nick) => write!(f, "$ValidateNick {}", escape(nick)),
            OutCommand::Version => write!(f, "$Version 1,0091"),
            OutCommand::GetNickList => write!(f, "$GetNickList"),
            OutCommand::GetInfo { nick, my_nick } => {
                write!(f, "$GetINFO {} {}", escape(nick), escape(my_nick))
            }
            OutCommand::MyPass(pass) => write!(f, "$MyPass {}", escape(pass)),
            OutCommand::MyHubUrl(url) => write!(f, "$MyHubURL {}", escape(url)),
            OutCommand::ConnectToMe {
                target,
                address,
                port,
                nat,
                secure,
                sender,
            } => {
                write!(f, "$ConnectToMe {} {}:{}", escape(target), escape(address), port)?;
                match nat {
                    NatFlag::None => {}
                    NatFlag::Nat => f.write_str("N")?,
                    NatFlag::Reply => f.write_str("R")?,
                }
                if *secure {
                    f.write_str("S")?;
                }
                if let Some(sender) = sender {
                    write!(f, " {}", escape(sender))?;
                }
                Ok(())
            }
            OutCommand::RevConnectToMe { from, to } => {
                write!(f, "$RevConnectToMe {} {}", escape(from), escape(to))
            }
            OutCommand::Chat { nick, text } => write!(f, "<{}> {}", escape(nick), escape(text)),
            OutCommand::PrivateMessage { to, from, text } => write!(
                f,
                "$To: {} From: {} $<{}> {}",
                escape(to),
                escape(from),
                escape(from),
                escape(text)
            ),
            OutCommand::Raw(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_connect() {
        let req = ConnectRequest::parse("me 10.0.0.5:412").unwrap();
        assert_eq!(req.target, "me");
        assert_eq!(req.server, "10.0.0.5");
        assert_eq!(req.port, 412);
        assert!(!req.secure);
        assert_eq!(req.nat, NatFlag::None);
        assert_eq!(req.sender, None);
    }

    #[test]
    fn test_parse_nat_connect() {
        let req = ConnectRequest::parse("me 10.0.0.5:5000NS bob").unwrap();
        assert_eq!(req.port, 5000);
        assert!(req.secure);
        assert_eq!(req.nat, NatFlag::Nat);
        assert_eq!(req.sender.as_deref(), Some("bob"));

        let reply = ConnectRequest::parse("me 10.0.0.5:5001R").unwrap();
        assert_eq!(reply.nat, NatFlag::Reply);
        assert!(!reply.secure);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ConnectRequest::parse("me").is_none());
        assert!(ConnectRequest::parse("me 10.0.0.5").is_none());
        assert!(ConnectRequest::parse("me 10.0.0.5:abc").is_none());
        assert!(ConnectRequest::parse("me 10.0.0.5:0").is_none());
        assert!(ConnectRequest::parse("me :412").is_none());
    }

    #[test]
    fn test_render_connect_to_me() {
        let cmd = OutCommand::ConnectToMe {
            target: "bob".into(),
            address: "1.2.3.4".into(),
            port: 412,
            nat: NatFlag::Nat,
            secure: true,
            sender: Some("me".into()),
        };
        assert_eq!(cmd.to_string(), "$ConnectToMe bob 1.2.3.4:412NS me");
    }

    #[test]
    fn test_render_escapes_params() {
        let cmd = OutCommand::Chat {
            nick: "me".into(),
            text: "cost: 5$ | cheap".into(),
        };
        assert_eq!(cmd.to_string(), "<me> cost: 5&#36; &#124; cheap");
    }

    #[test]
    fn test_key_keeps_raw_bytes() {
        let cmd = OutCommand::Key(vec![0xb5, 0x30]);
        assert_eq!(cmd.to_wire(), vec![b'$', b'K', b'e', b'y', b' ', 0xb5, 0x30]);
    }

    #[test]
    fn test_no_command_carries_raw_separator() {
        use crate::protocol::cipher::make_key;
        use crate::protocol::search::{SearchQuery, Seeker, FILE_TYPE_ANY, FILE_TYPE_TTH};

        let bad = "x|y$z &#124;".to_string();
        let commands = vec![
            OutCommand::Supports(vec!["NoGetINFO", "UserIP2"]),
            OutCommand::Key(make_key(b"EXTENDEDPROTOCOL|$|$~~~ Pk=|")),
            OutCommand::ValidateNick(bad.clone()),
            OutCommand::Version,
            OutCommand::GetNickList,
            OutCommand::GetInfo {
                nick: bad.clone(),
                my_nick: bad.clone(),
            },
            OutCommand::MyPass(bad.clone()),
            OutCommand::MyHubUrl(bad.clone()),
            OutCommand::ConnectToMe {
                target: bad.clone(),
                address: bad.clone(),
                port: 412,
                nat: NatFlag::Reply,
                secure: true,
                sender: Some(bad.clone()),
            },
            OutCommand::RevConnectToMe {
                from: bad.clone(),
                to: bad.clone(),
            },
            OutCommand::Chat {
                nick: bad.clone(),
                text: bad.clone(),
            },
            OutCommand::PrivateMessage {
                to: bad.clone(),
                from: bad.clone(),
                text: bad.clone(),
            },
        ];
        for cmd in &commands {
            assert!(!cmd.to_wire().contains(&b'|'), "{} leaked a separator", cmd.type_name());
        }

        for file_type in [FILE_TYPE_ANY, FILE_TYPE_TTH] {
            let query = SearchQuery {
                filter: bad.clone(),
                size: None,
                file_type,
            };
            assert_eq!(query.is_valid(), file_type == FILE_TYPE_ANY);
            for seeker in [Seeker::Active(bad.clone()), Seeker::Passive(bad.clone())] {
                for tths in [false, true] {
                    assert!(!query.render(&seeker, tths).contains('|'));
                }
            }
        }
    }
}
