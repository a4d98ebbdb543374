//! Configuration loading with environment variable fallback.
//!
//! Reads `config.json` (or a `.toml` file, chosen by extension) into a
//! strongly-typed struct. Every key is optional; anything missing takes
//! its default. Telegram credentials left empty in the file are looked
//! up in `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::storage::DEFAULT_BET_LOG_FILE;

/// Default config file path.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default band catalog path.
pub const DEFAULT_CATALOG_FILE: &str = "BetfairSpPositiveDifferences.json";

const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
const CHAT_ID_ENV: &str = "TELEGRAM_CHAT_ID";

/// Top-level application configuration.
#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Band catalog (track fragment → odds bands) file.
    #[serde(alias = "positiveDifferencesPath", alias = "PositiveDifferencesPath")]
    pub positive_differences_path: PathBuf,
    /// Persisted bet log file.
    #[serde(alias = "betLogPath", alias = "BetLogPath")]
    pub bet_log_path: PathBuf,
    #[serde(alias = "notifyBotToken", alias = "TelegramBotToken")]
    pub telegram_bot_token: Option<String>,
    #[serde(alias = "notifyChatId", alias = "TelegramChatId")]
    pub telegram_chat_id: Option<String>,
    pub monitor: MonitorConfig,
}

/// Timing and execution knobs for each market monitor.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Pause after opening a market before the first read.
    pub settle_delay_secs: u64,
    /// Interval between in-play polls.
    pub poll_interval_secs: u64,
    /// Give up waiting for in-play after this long. `None` waits forever.
    pub in_play_timeout_secs: Option<u64>,
    /// Record matched bets without submitting orders.
    pub dry_run: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            positive_differences_path: PathBuf::from(DEFAULT_CATALOG_FILE),
            bet_log_path: PathBuf::from(DEFAULT_BET_LOG_FILE),
            telegram_bot_token: None,
            telegram_chat_id: None,
            monitor: MonitorConfig::default(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: 2,
            poll_interval_secs: 2,
            in_play_timeout_secs: None,
            dry_run: false,
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("positive_differences_path", &self.positive_differences_path)
            .field("bet_log_path", &self.bet_log_path)
            .field(
                "telegram_bot_token",
                &self.telegram_bot_token().map(|_| "[REDACTED]"),
            )
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from a JSON or TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let mut config: AppConfig = if is_toml {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        };

        config.apply_env_fallback();
        Ok(config)
    }

    /// Load configuration, falling back to defaults (with a warning)
    /// when the file is missing or unparsable.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using default values");
            let mut config = Self::default();
            config.apply_env_fallback();
            return config;
        }

        match Self::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "Configuration loaded");
                config
            }
            Err(e) => {
                warn!(error = %e, "Error reading config file, using default values");
                let mut config = Self::default();
                config.apply_env_fallback();
                config
            }
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    fn apply_env_fallback(&mut self) {
        if self.telegram_bot_token().is_none() {
            self.telegram_bot_token = Self::resolve_env(BOT_TOKEN_ENV).ok();
        }
        if self.telegram_chat_id().is_none() {
            self.telegram_chat_id = Self::resolve_env(CHAT_ID_ENV).ok();
        }
    }

    /// Bot token, if set and non-empty.
    pub fn telegram_bot_token(&self) -> Option<&str> {
        non_empty(self.telegram_bot_token.as_deref())
    }

    /// Chat id, if set and non-empty.
    pub fn telegram_chat_id(&self) -> Option<&str> {
        non_empty(self.telegram_chat_id.as_deref())
    }
}

impl MonitorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn in_play_timeout(&self) -> Option<Duration> {
        self.in_play_timeout_secs.map(Duration::from_secs)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
