//! Unknown-command statistics
//!
//! Owned by the [`ClientContext`](crate::hub::ClientContext) and shared by its
//! sessions instead of living in process globals.

use log::{debug, info};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Distinct unknown commands tracked per hub
pub const MAX_TRACKED_COMMANDS: usize = 64;

/// Longest raw line kept per command, in bytes
pub const MAX_FIRST_LINE: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct UnknownCommand {
    count: u64,
    first_line: String,
}

/// Per-hub counters of commands nobody handles
#[derive(Debug, Default)]
pub struct Diagnostics {
    // hub url -> command -> stats
    unknown: Mutex<BTreeMap<String, BTreeMap<String, UnknownCommand>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one unknown command; the first sighting per hub is logged.
    ///
    /// Once a hub has [`MAX_TRACKED_COMMANDS`] distinct names, new ones are
    /// dropped and only the existing counters keep growing.
    pub fn record_unknown(&self, hub_url: &str, command: &str, raw_line: &str) -> bool {
        let first_line = truncate(raw_line, MAX_FIRST_LINE);
        let first = {
            let mut unknown = self.unknown.lock();
            let commands = unknown.entry(hub_url.to_string()).or_default();
            if !commands.contains_key(command) && commands.len() >= MAX_TRACKED_COMMANDS {
                debug!("{}: unknown command table full, dropping {}", hub_url, command);
                return false;
            }
            let entry = commands.entry(command.to_string()).or_default();
            entry.count += 1;
            if entry.first_line.is_empty() {
                entry.first_line = first_line.to_string();
                true
            } else {
                false
            }
        };
        if first {
            info!(
                "First unknown command on {}: {} (raw: {})",
                hub_url, command, first_line
            );
        }
        first
    }

    pub fn unknown_count(&self, hub_url: &str, command: &str) -> u64 {
        self.unknown
            .lock()
            .get(hub_url)
            .and_then(|m| m.get(command))
            .map_or(0, |c| c.count)
    }

    /// `Hub: <url> Invalid command: <cmd> ( count: N) ...` per hub
    pub fn summary(&self) -> String {
        let unknown = self.unknown.lock();
        let mut out = String::new();
        for (hub, commands) in unknown.iter() {
            let _ = write!(out, "Hub: {} Invalid command:", hub);
            for (cmd, stats) in commands {
                let _ = write!(out, " {} ( count: {})", cmd, stats.count);
            }
            out.push('\n');
        }
        out
    }

    /// First raw line seen for each unknown command, then reset.
    pub fn drain_first_lines(&self) -> Vec<(String, String, u64, String)> {
        let mut unknown = self.unknown.lock();
        let mut out = Vec::new();
        for (hub, commands) in std::mem::take(&mut *unknown) {
            for (cmd, stats) in commands {
                out.push((hub.clone(), cmd, stats.count, stats.first_line));
            }
        }
        out
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
