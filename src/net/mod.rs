//! Hub transport

pub mod connection;

pub use connection::{now_ms, ConnectionError, HubClient, CONNECT_TIMEOUT, TICK_INTERVAL};
