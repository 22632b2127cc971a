//! relaybot runtime settings.
//!
//! These are operator settings read once at startup. The forwarding target
//! itself lives in the state file managed by [`crate::store::ConfigStore`]
//! because chat commands rewrite it while the bot runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Upper bound for a single Bot API request, including long polls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Pause after every delivery before the next item is taken.
    #[serde(default = "default_delivery_delay_ms")]
    pub delivery_delay_ms: u64,
    /// JSON file holding the forwarding target and delivery mode.
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            delivery_delay_ms: default_delivery_delay_ms(),
            state_path: default_state_path(),
        }
    }
}

fn default_queue_capacity() -> usize {
    500
}

fn default_delivery_delay_ms() -> u64 {
    500
}

fn default_state_path() -> String {
    "config.json".to_string()
}

impl ForwarderConfig {
    pub fn delivery_delay(&self) -> Duration {
        Duration::from_millis(self.delivery_delay_ms)
    }
}

impl RelayConfig {
    /// Load settings from `path`, or from the default location.
    ///
    /// An explicit path must exist; a missing default file falls back to
    /// built-in defaults so a bare `.env` with a token is enough to run.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = match path {
            Some(path) => path,
            None => default_config_path()?,
        };

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.telegram.bot_token = v.trim().to_string();
            }
        }
        if let Ok(v) = std::env::var("RELAYBOT_STATE_PATH") {
            if !v.trim().is_empty() {
                self.forwarder.state_path = v;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.forwarder.queue_capacity == 0 {
            return Err(anyhow::anyhow!("forwarder.queue_capacity must be > 0"));
        }
        if self.forwarder.state_path.trim().is_empty() {
            return Err(anyhow::anyhow!("forwarder.state_path is required"));
        }
        if self.telegram.poll_timeout_secs == 0 {
            return Err(anyhow::anyhow!("telegram.poll_timeout_secs must be > 0"));
        }
        if self.telegram.request_timeout_secs <= self.telegram.poll_timeout_secs {
            return Err(anyhow::anyhow!(
                "telegram.request_timeout_secs must exceed telegram.poll_timeout_secs"
            ));
        }
        Ok(())
    }

    /// Token check is separate so `status` works without credentials.
    pub fn require_bot_token(&self) -> anyhow::Result<&str> {
        let token = self.telegram.bot_token.trim();
        if token.is_empty() {
            return Err(anyhow::anyhow!(
                "telegram bot token is not set; export TELEGRAM_BOT_TOKEN or set telegram.bot_token"
            ));
        }
        Ok(token)
    }

    pub fn state_path(&self) -> anyhow::Result<PathBuf> {
        expand_home(&self.forwarder.state_path)
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(".relaybot").join("config.toml"))
}

fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim();
    if !trimmed.starts_with("~/") {
        return Ok(PathBuf::from(trimmed));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(trimmed.replacen('~', &home, 1)))
}
