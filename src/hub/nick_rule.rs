//! `$NickRule` constraints and nick mutation

use log::warn;
use rand::Rng;

/// Most forbidden characters kept from one rule
pub const MAX_CHARS: usize = 32;

/// Most prefixes kept from one rule
pub const MAX_PREFIXES: usize = 16;

/// Nick constraints announced by the hub
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NickRule {
    pub min_len: usize,
    pub max_len: usize,
    pub invalid_chars: Vec<char>,
    pub prefixes: Vec<String>,
}

impl NickRule {
    /// Parse `Min 3$$Max 64$$Char 32 36$$Pref [A] [B]`.
    ///
    /// Out-of-range values void the whole rule.
    pub fn parse(param: &str) -> Option<Self> {
        let mut rule = NickRule::default();
        for item in param.split("$$").filter(|s| !s.is_empty()) {
            let Some((key, value)) = item.split_once(' ') else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            match key {
                "Min" => {
                    let min = value.trim().parse::<usize>().unwrap_or(0);
                    if min > 64 {
                        warn!("Bad NickRule value Min={}", value);
                        return None;
                    }
                    rule.min_len = min;
                }
                "Max" => {
                    let max = value.trim().parse::<usize>().unwrap_or(0);
                    if max < 4 {
                        warn!("Bad NickRule value Max={}", value);
                        return None;
                    }
                    rule.max_len = max;
                }
                "Char" => {
                    for tok in value.split(' ').filter(|t| !t.is_empty()) {
                        if let Ok(code) = tok.parse::<u8>() {
                            if rule.invalid_chars.len() < MAX_CHARS {
                                rule.invalid_chars.push(char::from(code));
                            }
                        }
                    }
                }
                "Pref" => {
                    for tok in value.split(' ').filter(|t| !t.is_empty()) {
                        if rule.prefixes.len() >= MAX_PREFIXES {
                            break;
                        }
                        rule.prefixes.push(tok.to_string());
                    }
                }
                _ => {}
            }
        }
        if rule.max_len > 0 && rule.min_len > rule.max_len {
            warn!("Bad NickRule Min={} > Max={}", rule.min_len, rule.max_len);
            return None;
        }
        Some(rule)
    }

    /// Rewrite `nick` to satisfy the rule.
    ///
    /// Returns the new nick and whether a `_R` suffix was appended, or `None`
    /// when no conforming nick can be produced.
    pub fn convert(&self, nick: &str, rng: &mut impl Rng) -> Option<(String, bool)> {
        let mut nick = nick.to_string();
        if !self.invalid_chars.is_empty() {
            // replacing with '_' is pointless if '_' itself is forbidden
            if self.invalid_chars.contains(&'_')
                && self.invalid_chars.len() > 1
                && nick.contains('_')
            {
                return None;
            }
            nick = nick
                .chars()
                .map(|c| if self.invalid_chars.contains(&c) { '_' } else { c })
                .collect();
        }
        if !self.prefixes.is_empty() {
            let has_prefix = self
                .prefixes
                .iter()
                .any(|p| nick.len() > p.len() && nick.starts_with(p.as_str()));
            if !has_prefix {
                let prefix = &self.prefixes[rng.gen_range(0..self.prefixes.len())];
                nick.insert_str(0, prefix);
            }
        }
        let mut suffixed = false;
        if self.min_len > 0 && nick.chars().count() < self.min_len {
            nick = with_random_suffix(&nick, self.min_len, rng);
            suffixed = true;
        }
        if self.max_len > 0 && nick.chars().count() > self.max_len {
            return None;
        }
        Some((nick, suffixed))
    }
}

/// Append `_R` and at least one random digit, padding to `min_len`.
pub fn with_random_suffix(nick: &str, min_len: usize, rng: &mut impl Rng) -> String {
    let mut out = format!("{}_R", nick);
    loop {
        out.push(char::from(b'0' + rng.gen_range(0..10u8)));
        if out.chars().count() >= min_len {
            return out;
        }
    }
}

/// Replace bytes no hub accepts in a nick.
pub fn sanitize_nick(nick: &str) -> String {
    nick.chars()
        .map(|c| {
            if (c as u32) <= 32 || matches!(c, '|' | '$' | '<' | '>') {
                '_'
            } else {
                c
            }
        })
        .collect()
}
