//! Configuration loader and validator for the channel relay bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub discord: Discord,
    #[serde(default)]
    pub relay: Relay,
    #[serde(default)]
    pub cache: Cache,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Chat platform credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discord {
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// Relay engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Relay {
    /// Name of the per-channel proxy identity.
    pub proxy_name: String,
    pub invite_ttl_secs: u64,
    /// Characters of the replied-to message shown in the reply preview.
    pub reply_preview_chars: usize,
    /// Stop the whole fan-out when one target guild has banned the author.
    pub ban_aborts_fanout: bool,
}

/// Capacities of the memo caches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Cache {
    pub channels: usize,
    pub links: usize,
    pub members: usize,
    pub bans: usize,
    pub proxies: usize,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10/".to_string()
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            proxy_name: "Wormhole Sender".to_string(),
            invite_ttl_secs: 60 * 15,
            reply_preview_chars: 50,
            ban_aborts_fanout: true,
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            channels: 1024,
            links: 512,
            members: 512,
            bans: 1024,
            proxies: 1024,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over the configured URL, which wins over the data dir default.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.app.database_url.clone())
            .unwrap_or_else(|| format!("sqlite://{}/wormhole.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.discord.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("discord.bot_token must be non-empty"));
    }
    if !cfg.discord.api_base.ends_with('/') {
        return Err(ConfigError::Invalid("discord.api_base must end with '/'"));
    }
    if cfg.relay.proxy_name.trim().is_empty() {
        return Err(ConfigError::Invalid("relay.proxy_name must be non-empty"));
    }
    if cfg.relay.invite_ttl_secs == 0 {
        return Err(ConfigError::Invalid("relay.invite_ttl_secs must be > 0"));
    }
    let c = &cfg.cache;
    if [c.channels, c.links, c.members, c.bans, c.proxies].contains(&0) {
        return Err(ConfigError::Invalid("cache capacities must be > 0"));
    }
    Ok(())
}

/// Example configuration document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

discord:
  bot_token: "YOUR_DISCORD_BOT_TOKEN"
  api_base: "https://discord.com/api/v10/"

relay:
  proxy_name: "Wormhole Sender"
  invite_ttl_secs: 900
  reply_preview_chars: 50
  ban_aborts_fanout: true

cache:
  channels: 1024
  links: 512
  members: 512
  bans: 1024
  proxies: 1024
"#
}
