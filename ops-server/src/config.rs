//! TOML configuration schema and boot-time validation.
//!
//! Loaded with serde + `toml`, but returning `Result` instead of panicking:
//! a bad config here is a fatal but recoverable boot error with a clean
//! exit code, not an unwind.

use std::collections::HashMap;
use std::path::Path;

use ops_api::{Error, Result};
use ops_core::ServerProfile;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_language")]
    pub language: String,
    pub chat_token: String,
    /// Where the registry's own sqlite file lives, distinct from every
    /// server's read-only game DB. Mirrors the original bot's
    /// `GLOBAL_DB_PATH` constant.
    pub registry_db_path: String,
    #[serde(default)]
    pub guild_sync: GuildSyncConfig,
    pub marketplace: MarketplaceConfig,
    pub servers: Vec<ServerConfig>,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuildSyncConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceConfig {
    pub enabled: bool,
    pub currency_item_id: i64,
    pub currency_name: String,
    #[serde(default = "default_sync_wait_seconds")]
    pub sync_wait_seconds: u64,
}

fn default_sync_wait_seconds() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub server_ip: String,
    pub rcon_port: u16,
    pub rcon_pass: String,
    pub status_channel_id: i64,
    pub db_path: String,
    pub log_path: String,
    #[serde(default)]
    pub reward: RewardConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RewardConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Minutes between grants, keyed by entitlement level. Level 0 is the
    /// fallback for any level without its own entry.
    #[serde(default)]
    pub intervals_minutes: HashMap<u32, u64>,
    #[serde(default)]
    pub reward_item_id: i64,
    #[serde(default = "default_reward_quantity")]
    pub reward_quantity: u32,
}

fn default_reward_quantity() -> u32 {
    1
}

impl Config {
    /// Reads and parses `path`; does not validate. Callers should follow
    /// with [`Config::validate`] before using the result to boot anything.
    pub async fn from_path(path: &Path) -> Result<Config> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Semantic checks a parser can't express: duplicate server names,
    /// a non-positive sync wait, and — for any server with rewards
    /// enabled — a reward interval table missing the level-0 fallback.
    pub fn validate(&self) -> Result<()> {
        if self.chat_token.trim().is_empty() {
            return Err(Error::Config("chat_token must not be empty".into()));
        }
        if self.servers.is_empty() {
            return Err(Error::Config("at least one server must be configured".into()));
        }
        if self.marketplace.sync_wait_seconds == 0 {
            return Err(Error::Config("marketplace.sync_wait_seconds must be positive".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if !seen.insert(&server.name) {
                return Err(Error::Config(format!("duplicate server name: {}", server.name)));
            }
            if server.reward.enabled && !server.reward.intervals_minutes.contains_key(&0) {
                return Err(Error::Config(format!(
                    "server {}: reward.intervals_minutes is missing a level-0 entry",
                    server.name
                )));
            }
        }
        Ok(())
    }

    pub fn server_profiles(&self) -> Vec<ServerProfile> {
        self.servers.iter().map(|s| self.to_profile(s)).collect()
    }

    fn to_profile(&self, server: &ServerConfig) -> ServerProfile {
        ServerProfile {
            name: server.name.clone(),
            rcon_ip: server.server_ip.clone(),
            rcon_port: server.rcon_port,
            rcon_password: server.rcon_pass.clone(),
            chat_channel_id: server.status_channel_id,
            game_db_path: server.db_path.clone(),
            log_path: server.log_path.clone(),
            reward_enabled: server.reward.enabled,
            reward_intervals: server.reward.intervals_minutes.clone(),
            reward_item_id: server.reward.reward_item_id,
            reward_quantity: server.reward.reward_quantity,
            currency_item_id: self.marketplace.currency_item_id,
            currency_name: self.marketplace.currency_name.clone(),
            sync_wait: std::time::Duration::from_secs(self.marketplace.sync_wait_seconds),
            marketplace_enabled: self.marketplace.enabled,
        }
    }
}
