//! Hub session configuration
//!
//! Loaded from JSON; every field has a default so a partial file works.

use crate::flood::AntiFloodConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for one hub session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// `host:port` or `dchub://host:port`
    pub address: String,
    pub nick: String,
    /// Empty when the account is not registered
    pub password: String,
    pub description: String,
    pub email: String,
    /// Upload speed label shown in presence
    pub speed: String,
    pub slots: u16,
    pub share_bytes: i64,
    pub client_name: String,
    pub client_version: String,
    /// Text encoding label the hub is assumed to use
    pub encoding: String,
    pub allow_nat_traversal: bool,
    /// Announce zero share
    pub hide_share: bool,
    /// Answer only TTH searches
    pub incoming_search_tth_only: bool,
    /// Forced interval between identical presence updates
    pub myinfo_interval_secs: u64,
    /// Retry with a mutated nick after the hub rejects ours
    pub auto_nick_retry: bool,
    pub reconnect_delay_secs: u64,
    pub anti_flood: AntiFloodConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            nick: String::new(),
            password: String::new(),
            description: String::new(),
            email: String::new(),
            speed: "100".to_string(),
            slots: 3,
            share_bytes: 0,
            client_name: "nmdc-rs".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            encoding: "utf-8".to_string(),
            allow_nat_traversal: true,
            hide_share: false,
            incoming_search_tth_only: false,
            myinfo_interval_secs: 120,
            auto_nick_retry: true,
            reconnect_delay_secs: 30,
            anti_flood: AntiFloodConfig::default(),
        }
    }
}

impl HubConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = fs::File::open(path)?;
        let config: HubConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON through a temporary file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let temp_path = path.with_extension("tmp");
        let file = fs::File::create(&temp_path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nick.chars().any(|c| matches!(c, ' ' | '$' | '|')) {
            return Err(ConfigError::Invalid(format!(
                "nick {:?} contains a reserved character",
                self.nick
            )));
        }
        if self.anti_flood.window_secs == 0 {
            return Err(ConfigError::Invalid("anti_flood.window_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Canonical hub URL used for CIDs and ban bookkeeping
    pub fn hub_url(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("dchub://{}", self.address)
        }
    }

    /// `host:port` for the TCP connect, default port 411
    pub fn socket_address(&self) -> String {
        let bare = self
            .address
            .split_once("://")
            .map_or(self.address.as_str(), |(_, rest)| rest)
            .trim_end_matches('/');
        if bare.rsplit_once(':').map_or(false, |(_, p)| p.parse::<u16>().is_ok()) {
            bare.to_string()
        } else {
            format!("{}:411", bare)
        }
    }

    pub fn myinfo_interval_ms(&self) -> u64 {
        self.myinfo_interval_secs.saturating_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.myinfo_interval_secs, 120);
        assert_eq!(config.anti_flood.min_req_count, 5);
        assert_eq!(config.anti_flood.max_req_per_minute, 10);
        assert_eq!(config.anti_flood.ban_time_secs, 3600);
    }

    #[test]
    fn test_partial_json_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.json");
        fs::write(
            &path,
            r#"{"address":"hub.example","nick":"bot","anti_flood":{"min_req_count":3}}"#,
        )
        .unwrap();

        let config = HubConfig::load(&path).unwrap();
        assert_eq!(config.nick, "bot");
        assert_eq!(config.anti_flood.min_req_count, 3);
        assert_eq!(config.anti_flood.max_req_per_minute, 10);
        assert_eq!(config.slots, 3);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.json");
        let config = HubConfig {
            address: "dchub://hub.example:4111".into(),
            nick: "saver".into(),
            hide_share: true,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(HubConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_nick_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hub.json");
        fs::write(&path, r#"{"nick":"bad nick"}"#).unwrap();
        assert!(matches!(HubConfig::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_addresses() {
        let config = HubConfig {
            address: "hub.example".into(),
            ..Default::default()
        };
        assert_eq!(config.hub_url(), "dchub://hub.example");
        assert_eq!(config.socket_address(), "hub.example:411");

        let config = HubConfig {
            address: "dchub://hub.example:4111/".into(),
            ..Default::default()
        };
        assert_eq!(config.socket_address(), "hub.example:4111");
    }
}
