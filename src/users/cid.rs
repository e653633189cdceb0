//! Client IDs

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// CID length in bytes
pub const CID_LEN: usize = 24;

/// Identity used to correlate one user across hubs.
///
/// NMDC peers do not announce a CID, so one is derived from nick and hub
/// URL. The all-zero value means "not assigned" and is never registered.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Cid([u8; CID_LEN]);

impl Cid {
    pub const ZERO: Cid = Cid([0u8; CID_LEN]);

    pub fn from_bytes(bytes: [u8; CID_LEN]) -> Self {
        Cid(bytes)
    }

    /// Derive the CID of `nick` as seen on `hub_url`.
    pub fn for_nick(nick: &str, hub_url: &str) -> Self {
        if nick.is_empty() {
            return Cid::ZERO;
        }
        let mut hasher = Sha256::new();
        hasher.update(nick.to_lowercase().as_bytes());
        hasher.update(hub_url.to_lowercase().as_bytes());
        let digest = hasher.finalize();

        let mut out = [0u8; CID_LEN];
        out.copy_from_slice(&digest[..CID_LEN]);
        Cid(out)
    }

    /// Fresh random CID for the local client
    pub fn generate() -> Self {
        let mut out = [0u8; CID_LEN];
        rand::thread_rng().fill_bytes(&mut out);
        Cid(out)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; CID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({}..)", &self.to_hex()[..8])
    }
}
