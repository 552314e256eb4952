// src/config/mod.rs
//! Application settings: `config/digest.toml` plus environment overrides.
//! AI settings live in `config/ai.json` (see [`ai`]).

pub mod ai;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::window::DEFAULT_MAX_PARSE_HOURS;

pub const DEFAULT_SETTINGS_PATH: &str = "config/digest.toml";
pub const ENV_SETTINGS_PATH: &str = "DIGEST_CONFIG_PATH";

pub const ENV_MAX_PARSE_HOURS: &str = "DIGEST_MAX_PARSE_HOURS";
pub const ENV_MAX_WORKERS: &str = "DIGEST_MAX_WORKERS";
pub const ENV_STATE_DIR: &str = "DIGEST_STATE_DIR";
pub const ENV_SOURCES_PATH: &str = "DIGEST_SOURCES_PATH";
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const ENV_DISCORD_WEBHOOK_URL: &str = "DISCORD_WEBHOOK_URL";

pub const DEFAULT_MAX_CONCURRENT_WORKERS: usize = 3;
pub const DEFAULT_NO_NEWS_MESSAGE: &str = "No news for the past period";

/// Retry knobs as they appear in config files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub tries: u32,
    pub delay_secs: f64,
    pub backoff: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            tries: 3,
            delay_secs: 5.0,
            backoff: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.tries,
            Duration::from_secs_f64(self.delay_secs.max(0.0)),
            self.backoff.max(1.0),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DigestSettings {
    /// Ceiling on how far back a cycle looks.
    pub max_parse_hours: u32,
    /// Ceiling on concurrently processed groups.
    pub max_concurrent_workers: usize,
    /// Period of the "still working" signal.
    pub liveness_interval_secs: u64,
    pub state_dir: PathBuf,
    pub sources_path: PathBuf,
    pub ai_config_path: PathBuf,
    pub no_news_message: String,
    /// Consecutive failures before a feed is disabled.
    pub disable_feed_after: u32,
    /// Retry policy for feed downloads.
    pub fetch_retry: RetrySettings,
    pub telegram: Option<TelegramSettings>,
    pub discord: Option<DiscordSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscordSettings {
    pub webhook_url: String,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            max_parse_hours: DEFAULT_MAX_PARSE_HOURS,
            max_concurrent_workers: DEFAULT_MAX_CONCURRENT_WORKERS,
            liveness_interval_secs: 4,
            state_dir: PathBuf::from("state"),
            sources_path: PathBuf::from("config/sources.toml"),
            ai_config_path: PathBuf::from(ai::DEFAULT_AI_CONFIG_PATH),
            no_news_message: DEFAULT_NO_NEWS_MESSAGE.to_string(),
            disable_feed_after: crate::fetch::rss::DEFAULT_DISABLE_AFTER,
            fetch_retry: RetrySettings {
                tries: 3,
                delay_secs: 2.0,
                backoff: 2.0,
            },
            telegram: None,
            discord: None,
        }
    }
}

impl DigestSettings {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let cfg: DigestSettings =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $DIGEST_CONFIG_PATH
    /// 2) config/digest.toml
    /// 3) built-in defaults
    ///
    /// Environment overrides are applied afterwards, then the result is validated.
    pub fn load() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_SETTINGS_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_SETTINGS_PATH} points to non-existent path");
            }
            Self::load_from_file(&pb)?
        } else if Path::new(DEFAULT_SETTINGS_PATH).exists() {
            Self::load_from_file(DEFAULT_SETTINGS_PATH)?
        } else {
            Self::default()
        };
        let cfg = base.with_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(v) = std::env::var(ENV_MAX_PARSE_HOURS) {
            self.max_parse_hours = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_PARSE_HOURS}={v}"))?;
        }
        if let Ok(v) = std::env::var(ENV_MAX_WORKERS) {
            self.max_concurrent_workers = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_WORKERS}={v}"))?;
        }
        if let Ok(v) = std::env::var(ENV_STATE_DIR) {
            self.state_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(ENV_SOURCES_PATH) {
            self.sources_path = PathBuf::from(v);
        }

        let token = std::env::var(ENV_TELEGRAM_BOT_TOKEN).ok();
        let chat = std::env::var(ENV_TELEGRAM_CHAT_ID).ok();
        match (&mut self.telegram, token, chat) {
            (Some(tg), token, chat) => {
                if let Some(t) = token {
                    tg.bot_token = t;
                }
                if let Some(c) = chat {
                    tg.chat_id = c;
                }
            }
            (None, Some(bot_token), Some(chat_id)) => {
                self.telegram = Some(TelegramSettings { bot_token, chat_id });
            }
            _ => {}
        }

        if let Ok(url) = std::env::var(ENV_DISCORD_WEBHOOK_URL) {
            self.discord = Some(DiscordSettings { webhook_url: url });
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parse_hours == 0 {
            bail!("max_parse_hours must be greater than zero");
        }
        if self.max_concurrent_workers == 0 {
            bail!("max_concurrent_workers must be greater than zero");
        }
        if self.liveness_interval_secs == 0 {
            bail!("liveness_interval_secs must be greater than zero");
        }
        if let Some(tg) = &self.telegram {
            if tg.bot_token.trim().is_empty() || tg.chat_id.trim().is_empty() {
                bail!("telegram section needs both bot_token and chat_id");
            }
        }
        Ok(())
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir.join(crate::checkpoint::CHECKPOINT_FILE)
    }

    pub fn failures_path(&self) -> PathBuf {
        self.state_dir.join("feed_failures.jsonl")
    }
}
