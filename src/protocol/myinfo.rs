//! `$MyINFO` presence parsing and rendering

use crate::protocol::codec::{escape, unescape};
use bitflags::bitflags;

bitflags! {
    /// Status byte carried after the connection speed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NmdcStatus: u8 {
        const NORMAL = 0x01;
        const AWAY = 0x02;
        const SERVER = 0x04;
        const FIREBALL = 0x08;
        const TLS = 0x10;
        const NAT0 = 0x20;
    }
}

/// Parsed client tag: `<client V:ver,M:A,H:n/r/o,S:slots,L:limit>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientTag {
    pub application: Option<String>,
    pub version: Option<String>,
    /// `A`, `P` or `5`
    pub mode: Option<char>,
    /// Normal / registered / operator hub counts
    pub hubs: Option<(u32, u32, u32)>,
    pub slots: Option<u16>,
    /// Upload limit in bytes per second
    pub limit: u32,
}

impl ClientTag {
    /// Parse the text between `<` and `>`.
    pub fn parse(tag: &str) -> Self {
        let mut out = ClientTag::default();
        for tok in tag.split(',').filter(|t| t.len() >= 2) {
            if let Some(v) = tok.strip_prefix("H:") {
                let parts: Vec<u32> = v.split('/').filter_map(|p| p.parse().ok()).collect();
                if let [n, r, o] = parts[..] {
                    out.hubs = Some((n, r, o));
                }
            } else if let Some(v) = tok.strip_prefix("S:") {
                out.slots = Some(leading_int(v).clamp(0, i64::from(u16::MAX)) as u16);
            } else if let Some(v) = tok.strip_prefix("M:") {
                if v.len() == 1 {
                    out.mode = v.chars().next();
                }
            } else if let Some(j) = tok.find("V:").or_else(|| tok.find("v:")) {
                let application = tok[..j].trim_end();
                if j > 1 && !application.is_empty() {
                    out.application = Some(application.to_string());
                }
                out.version = Some(tok[j + 2..].to_string());
            } else if let Some(j) = tok.find("L:") {
                let kib = leading_int(&tok[j + 2..]).clamp(0, i64::from(u32::MAX));
                out.limit = (kib as u32).saturating_mul(1024);
            } else if let Some(j) = tok.find(' ') {
                if j > 1 {
                    out.application = Some(tok[..j].to_string());
                }
                out.version = Some(tok[j + 1..].to_string());
            }
        }
        out
    }

    /// Whether the tag reports an active client
    pub fn is_active(&self) -> Option<bool> {
        self.mode.map(|m| m == 'A')
    }
}

fn leading_int(s: &str) -> i64 {
    let end = s
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().unwrap_or(0)
}

/// A user's presence as seen on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MyInfo {
    pub nick: String,
    pub description: String,
    pub tag: Option<ClientTag>,
    /// Legacy `$A`/`$P` marker used by tagless clients
    pub legacy_mode: Option<char>,
    pub connection: String,
    pub status: NmdcStatus,
    pub email: String,
    pub share: i64,
}

impl MyInfo {
    /// Parse the parameter of `$MyINFO` (starting with `$ALL `).
    ///
    /// Trailing fields may be missing; parsing stops at the first absent one
    /// and keeps what was read so far.
    pub fn parse(param: &str) -> Option<Self> {
        let body = param.strip_prefix("$ALL ")?;
        let (nick, rest) = body.split_once(' ')?;
        if nick.is_empty() {
            return None;
        }
        let mut info = MyInfo {
            nick: unescape(nick),
            ..Default::default()
        };

        let desc_end = rest.find('$')?;
        let desc = unescape(&rest[..desc_end]);
        match desc.strip_suffix('>').and_then(|d| d.rfind('<').map(|x| (x, d))) {
            Some((x, d)) => {
                info.tag = Some(ClientTag::parse(&d[x + 1..]));
                info.description = d[..x].to_string();
            }
            None => {
                info.description = desc;
                info.legacy_mode = match rest.as_bytes().get(desc_end + 1) {
                    Some(b'A') => Some('A'),
                    Some(b'P') => Some('P'),
                    _ => None,
                };
            }
        }

        // skip "$<mode>$"
        let Some(rest) = rest.get(desc_end + 3..) else {
            return Some(info);
        };
        let Some(conn_end) = rest.find('$') else {
            return Some(info);
        };
        if conn_end > 0 {
            let conn = &rest[..conn_end];
            let (speed, status) = conn.split_at(conn.len() - conn.chars().last().map_or(0, char::len_utf8));
            info.connection = speed.to_string();
            info.status = status
                .bytes()
                .next()
                .map(NmdcStatus::from_bits_truncate)
                .unwrap_or_default();
        }

        let rest = &rest[conn_end + 1..];
        let Some(email_end) = rest.find('$') else {
            return Some(info);
        };
        info.email = unescape(&rest[..email_end]);

        let rest = &rest[email_end + 1..];
        if rest.find('$').is_none() {
            return Some(info);
        }
        info.share = leading_int(rest).max(0);
        Some(info)
    }
}

/// Inputs for rendering our own `$MyINFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnInfo {
    pub nick: String,
    pub description: String,
    pub client_name: String,
    pub client_version: String,
    pub active: bool,
    pub hubs: (u32, u32, u32),
    pub slots: u16,
    pub speed: String,
    pub status: NmdcStatus,
    pub email: String,
    pub share: i64,
}

impl OwnInfo {
    pub fn render(&self) -> String {
        let (mut n, r, o) = self.hubs;
        if n + r + o == 0 {
            n = 1;
        }
        // the status byte is raw; keep it printable by construction
        let status = char::from(self.status.bits() | NmdcStatus::NORMAL.bits());
        format!(
            "$MyINFO $ALL {} {}<{} V:{},M:{},H:{}/{}/{},S:{}>$ ${}{}${}${}$",
            escape(&self.nick),
            escape(&self.description),
            escape(&self.client_name),
            escape(&self.client_version),
            if self.active { 'A' } else { 'P' },
            n,
            r,
            o,
            self.slots,
            escape(&self.speed),
            status,
            escape(&self.email),
            self.share
        )
    }
}
