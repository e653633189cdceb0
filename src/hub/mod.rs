//! NMDC hub session engine
//!
//! Protocol lifecycle, user list upkeep, peer connect negotiation and
//! search handling for one hub connection.
//!
//! # Layout
//! - [`session`]: state machine and transport callbacks
//! - [`handlers`]: one function per inbound command
//! - [`connect`]: `$ConnectToMe` / `$RevConnectToMe` and NAT traversal
//! - [`search`]: answering and sending searches
//! - [`presence`]: own `$MyINFO`
//! - [`context`]: state shared by all sessions of a client

pub mod config;
pub mod connect;
pub mod context;
pub mod diagnostics;
pub mod events;
pub mod handlers;
pub mod nick_rule;
pub mod presence;
pub mod search;
pub mod services;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, HubConfig};
pub use context::{ClientContext, HubRole};
pub use diagnostics::Diagnostics;
pub use events::{
    ChatMessage, DisconnectReason, HubEvent, NickError, UserCommand, UserCommandKind,
};
pub use nick_rule::NickRule;
pub use services::{ConnectionBroker, NatRole, PeerConnect, SearchHit, SearchResponder};
pub use session::{
    password_response, HubSession, HubSupports, PendingNat, State, EXPECT_TIMEOUT_MS,
    MAX_SEARCH_INTERVAL_MS, MIN_SEARCH_INTERVAL_MS, NAT_PENDING_MS,
};
