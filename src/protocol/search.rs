//! `$Search`, `$SA` and `$SP` request parsing and rendering
//!
//! Inbound searches become a transient [`SearchRequest`] that is consumed once
//! by the search responder. Outbound searches are built from a [`SearchQuery`].

use crate::protocol::codec::{escape, unescape};

// =============================================================================
// Constants
// =============================================================================

/// Wire code for "any file type"
pub const FILE_TYPE_ANY: u8 = 1;

/// Wire code for a TTH root lookup
pub const FILE_TYPE_TTH: u8 = 9;

/// Base32 TTH length
pub const TTH_LEN: usize = 39;

/// Result caps per seeker kind
pub const MAX_RESULTS_PASSIVE: usize = 5;
pub const MAX_RESULTS_ACTIVE: usize = 10;

/// Prefix of a passive seeker token
pub const PASSIVE_PREFIX: &str = "Hub:";

// =============================================================================
// Types
// =============================================================================

/// Whether results go back over UDP or through the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Active,
    Passive,
}

/// Size restriction. An unrestricted search is `AtLeast` zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMode {
    AtLeast,
    AtMost,
}

/// Which wire form a request arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    /// `$Search <seeker> <flags>?...`
    Search,
    /// `$SA <tth> <ip:port>`
    TthActive,
    /// `$SP <tth> <nick>`
    TthPassive,
}

/// A parsed inbound search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// `ip:port` for active seekers, `Hub:<nick>` for passive ones
    pub seeker: String,
    pub mode: SearchMode,
    pub size_mode: SizeMode,
    pub size: i64,
    /// Wire file-type code (1 = any ... 9 = TTH)
    pub file_type: u8,
    /// Unescaped query, or `TTH:<base32>` for hash lookups
    pub filter: String,
    pub max_results: usize,
    /// Dedup key for text searches: `<max>=<raw query part>`
    pub cache_key: Option<String>,
}

impl SearchRequest {
    /// Parse an inbound search of the given kind.
    pub fn parse(kind: SearchKind, param: &str) -> Option<Self> {
        match kind {
            SearchKind::Search => Self::parse_search(param),
            SearchKind::TthActive => Self::parse_tth(param, SearchMode::Active),
            SearchKind::TthPassive => Self::parse_tth(param, SearchMode::Passive),
        }
    }

    fn parse_search(param: &str) -> Option<Self> {
        let (seeker, query_part) = param.split_once(' ')?;
        if seeker.is_empty() {
            return None;
        }
        let mode = if seeker.starts_with(PASSIVE_PREFIX) {
            SearchMode::Passive
        } else {
            SearchMode::Active
        };

        let bytes = query_part.as_bytes();
        if bytes.len() < 4 || bytes[1] != b'?' || bytes[3] != b'?' {
            return None;
        }
        let restricted = bytes[0] == b'T';
        let size_mode = if bytes[2] == b'T' {
            SizeMode::AtMost
        } else {
            SizeMode::AtLeast
        };

        let mut fields = query_part[4..].splitn(3, '?');
        let size_field = fields.next().filter(|s| !s.is_empty())?;
        let type_field = fields.next().filter(|s| !s.is_empty())?;
        let query = fields.next()?;

        let size = size_field.parse::<i64>().unwrap_or(0).max(0);
        let file_type = type_field.parse::<u8>().unwrap_or(FILE_TYPE_ANY);

        let (filter, cache_key) = if file_type == FILE_TYPE_TTH {
            if query.len() != TTH_LEN + 4 || !query.starts_with("TTH:") {
                return None;
            }
            (query.to_string(), None)
        } else {
            (unescape(query), Some(query_part.to_string()))
        };
        if filter.is_empty() {
            return None;
        }

        // an active seeker must be ip:port
        if mode == SearchMode::Active && !seeker.contains(':') {
            return None;
        }

        let (size_mode, size) = if restricted {
            (size_mode, size)
        } else {
            (SizeMode::AtLeast, 0)
        };

        Some(Self::finish(Self {
            seeker: seeker.to_string(),
            mode,
            size_mode,
            size,
            file_type,
            filter,
            max_results: 0,
            cache_key,
        }))
    }

    fn parse_tth(param: &str, mode: SearchMode) -> Option<Self> {
        let bytes = param.as_bytes();
        if bytes.len() < TTH_LEN + 2 || bytes[TTH_LEN] != b' ' {
            return None;
        }
        if !bytes[..TTH_LEN].iter().all(|b| is_base32(*b)) {
            return None;
        }
        let tth = &param[..TTH_LEN];
        let target = &param[TTH_LEN + 1..];
        let seeker = match mode {
            SearchMode::Passive => format!("{}{}", PASSIVE_PREFIX, target),
            SearchMode::Active => {
                if !target.contains(':') {
                    return None;
                }
                target.to_string()
            }
        };

        Some(Self::finish(Self {
            seeker,
            mode,
            size_mode: SizeMode::AtLeast,
            size: 0,
            file_type: FILE_TYPE_TTH,
            filter: format!("TTH:{}", tth),
            max_results: 0,
            cache_key: None,
        }))
    }

    fn finish(mut req: Self) -> Self {
        req.max_results = match req.mode {
            SearchMode::Passive => MAX_RESULTS_PASSIVE,
            SearchMode::Active => MAX_RESULTS_ACTIVE,
        };
        if let Some(key) = req.cache_key.take() {
            req.cache_key = Some(format!("{}={}", req.max_results, key));
        }
        req
    }

    /// Nick of a passive seeker
    pub fn passive_nick(&self) -> Option<&str> {
        self.seeker.strip_prefix(PASSIVE_PREFIX)
    }

    /// `(ip, port)` of an active seeker
    pub fn active_addr(&self) -> Option<(&str, u16)> {
        if self.mode != SearchMode::Active {
            return None;
        }
        let (ip, port) = self.seeker.rsplit_once(':')?;
        Some((ip, port.parse().ok()?))
    }

    pub fn is_tth(&self) -> bool {
        self.file_type == FILE_TYPE_TTH
    }

    /// Whether this request is one of our own echoed back by the hub.
    pub fn is_own(&self, my_nick: &str, my_search_addr: Option<&str>) -> bool {
        match self.mode {
            SearchMode::Passive => self.passive_nick() == Some(my_nick),
            SearchMode::Active => my_search_addr == Some(self.seeker.as_str()),
        }
    }

    /// Query terms; NMDC uses `$` (or space) between words.
    pub fn terms(&self) -> Vec<&str> {
        self.filter
            .split(|c| c == '$' || c == ' ')
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Bare base32 Tiger tree root
pub fn is_tth(text: &str) -> bool {
    text.len() == TTH_LEN && text.bytes().all(is_base32)
}

fn is_base32(b: u8) -> bool {
    (b'2'..=b'7').contains(&b) || b.is_ascii_uppercase()
}

// =============================================================================
// Outgoing searches
// =============================================================================

/// Where results for an outgoing search should be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seeker {
    /// Our UDP `ip:port`
    Active(String),
    /// Our nick, results relayed by the hub
    Passive(String),
}

/// An outgoing search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Text query, or bare base32 TTH when `file_type` is TTH
    pub filter: String,
    /// `None` means unrestricted
    pub size: Option<(SizeMode, i64)>,
    pub file_type: u8,
}

impl SearchQuery {
    /// A hash lookup must carry exactly one base32 TTH.
    pub fn is_valid(&self) -> bool {
        self.file_type != FILE_TYPE_TTH || is_tth(&self.filter)
    }

    /// Render the command; `tths` selects `$SA`/`$SP` for hash lookups.
    pub fn render(&self, seeker: &Seeker, tths: bool) -> String {
        let file_type = if (FILE_TYPE_ANY..=FILE_TYPE_TTH).contains(&self.file_type) {
            self.file_type
        } else {
            FILE_TYPE_ANY
        };

        if tths && file_type == FILE_TYPE_TTH {
            return match seeker {
                Seeker::Active(addr) => format!("$SA {} {}", escape(&self.filter), escape(addr)),
                Seeker::Passive(nick) => format!("$SP {} {}", escape(&self.filter), escape(nick)),
            };
        }

        let (restricted, at_most, size) = match self.size {
            _ if file_type == FILE_TYPE_TTH => ('F', 'T', 0),
            None => ('F', 'T', 0),
            Some((SizeMode::AtLeast, size)) => ('T', 'F', size),
            Some((SizeMode::AtMost, size)) => ('T', 'T', size),
        };
        let query = if file_type == FILE_TYPE_TTH {
            format!("TTH:{}", escape(&self.filter))
        } else {
            escape(&self.filter).replace(' ', "$")
        };
        let seeker = match seeker {
            Seeker::Active(addr) => escape(addr),
            Seeker::Passive(nick) => format!("{}{}", PASSIVE_PREFIX, escape(nick)),
        };
        format!(
            "$Search {} {}?{}?{}?{}?{}",
            seeker, restricted, at_most, size, file_type, query
        )
    }
}
