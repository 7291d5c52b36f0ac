use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const TOKEN_ENV_VAR: &str = "QUILL_TELEGRAM_TOKEN";
const CONFIG_FILENAME: &str = "config.toml";

/// Limits and pacing for one rendered generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Hard platform limit for one message.
    pub max_message_length: usize,
    /// Ceiling the renderer aims for, below the platform limit.
    pub safe_message_length: usize,
    /// Unsent text this close to the ceiling triggers an overflow send.
    pub overflow_margin: usize,
    /// Overflow heads are cut at `safe_message_length - split_margin`.
    pub split_margin: usize,
    pub throttle_ms: u64,
    /// Trimmed answer length at which the answer counts as the real one.
    pub confirm_threshold: usize,
    pub stall_refresh_secs: u64,
    pub inter_message_delay_ms: u64,
    pub context_token_limit: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_message_length: 4096,
            safe_message_length: 3900,
            overflow_margin: 100,
            split_margin: 200,
            throttle_ms: 500,
            confirm_threshold: 100,
            stall_refresh_secs: 20,
            inter_message_delay_ms: 100,
            context_token_limit: 8000,
        }
    }
}

impl RenderConfig {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn stall_refresh(&self) -> Duration {
        Duration::from_secs(self.stall_refresh_secs)
    }

    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms)
    }

    pub fn overflow_threshold(&self) -> usize {
        self.safe_message_length.saturating_sub(self.overflow_margin)
    }

    pub fn split_limit(&self) -> usize {
        self.safe_message_length.saturating_sub(self.split_margin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub render: RenderConfig,
    pub telegram: TelegramConfig,
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults. The bot token from the environment
    /// overrides the one in the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {}", p.display()))?;
                debug!("Loaded config from {}", p.display());
                Self::from_toml(&text)
                    .with_context(|| format!("Failed to parse config file: {}", p.display()))?
            }
            _ => Self::default(),
        };

        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.trim().is_empty() {
                config.telegram.bot_token = Some(token.trim().to_string());
            }
        }

        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("quill").join(CONFIG_FILENAME))
}
