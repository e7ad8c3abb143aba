//! Runtime configuration, sourced from the process environment.
//!
//! There is no runtime reconfiguration: everything is read once at startup.
//! A `.env` file in the working directory is honored when present.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Environment variables read at startup.
pub const ENV_DB_PATH: &str = "HAVEN_DB_PATH";
pub const ENV_API_ADDR: &str = "HAVEN_API_ADDR";
pub const ENV_SLACK_TOKEN: &str = "SLACK_TOKEN";
pub const ENV_SLACK_CHANNEL_ID: &str = "SLACK_CHANNEL_ID";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HavenConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data/haven.db".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address for the HTTP API.
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_owned(),
        }
    }
}

/// Optional notifier credentials. Both must be present for notifications
/// to be active.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub slack_token: Option<String>,
    pub slack_channel_id: Option<String>,
}

impl NotificationsConfig {
    pub fn is_configured(&self) -> bool {
        matches!(
            (&self.slack_token, &self.slack_channel_id),
            (Some(token), Some(channel)) if !token.is_empty() && !channel.is_empty()
        )
    }
}

impl HavenConfig {
    /// Load from the process environment, reading `.env` first when present.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    /// Build from any key lookup. Tests inject a map instead of mutating the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
            notifications: NotificationsConfig::default(),
        };
        if let Some(path) = lookup(ENV_DB_PATH) {
            config.database.path = path;
        }
        if let Some(addr) = lookup(ENV_API_ADDR) {
            config.api.addr = addr;
        }
        config.notifications.slack_token = lookup(ENV_SLACK_TOKEN);
        config.notifications.slack_channel_id = lookup(ENV_SLACK_CHANNEL_ID);
        config
    }
}
