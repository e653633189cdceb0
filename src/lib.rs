//! NMDC hub client: the Direct Connect hub protocol engine in Rust
//!
//! This crate provides:
//! - Wire codec: `|`-framed lines, `$`/`|` escaping, the `$Lock`/`$Key` cipher
//! - Hub session state machine (Protocol → Identify → Normal)
//! - Online user directory with a process-wide CID registry
//! - Active, passive and NAT-traversal connect negotiation
//! - Search parsing and answering
//! - Per-peer flood protection with shared ban tables
//! - A tokio TCP transport with reconnect
//!
//! # Example
//!
//! ```rust
//! use nmdc_client::protocol::{escape, make_key, unescape};
//!
//! let key = make_key(b"ABCDEFGHIJKLMNOP");
//! assert_eq!(key.len(), 16);
//!
//! let escaped = escape("50$ | off");
//! assert_eq!(unescape(&escaped), "50$ | off");
//! ```

pub mod cli;
pub mod flood;
pub mod hub;
pub mod net;
pub mod protocol;
pub mod users;

// Re-export commonly used types
pub use flood::{AntiFloodConfig, BanTable, FloodGuard};
pub use hub::{
    ClientContext, ConnectionBroker, HubConfig, HubEvent, HubSession, SearchResponder, State,
};
pub use net::{ConnectionError, HubClient};
pub use protocol::{NmdcCodec, OutCommand, SearchQuery, SearchRequest};
pub use users::{Cid, OnlineUser, UserDirectory, UserRegistry};
