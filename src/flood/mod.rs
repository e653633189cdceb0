//! Flood protection for inbound search and connect requests
//!
//! - [`BanTable`]: address-keyed bans, shared across hub sessions
//! - [`FloodGuard`]: per-peer request counters for one request class

pub mod bans;
pub mod guard;

pub use bans::{BanEntry, BanState, BanTable, IpPortKey, MAX_HUB_URLS};
pub use guard::{AntiFloodConfig, FloodGuard, RequestCounter, Verdict};
