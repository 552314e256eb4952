// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use super::RetrySettings;
use crate::ai::openrouter::DEFAULT_BASE_URL;

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";
pub const ENV_API_KEY: &str = "OPENROUTER_API_KEY";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_model() -> String {
    "google/gemini-2.5-flash".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    120
}
fn default_api_key() -> String {
    "ENV".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// "ENV" means: read from OPENROUTER_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model for the per-group filter pass.
    #[serde(default = "default_model")]
    pub filter_model: String,
    /// Model for the final synthesis pass.
    #[serde(default = "default_model")]
    pub final_model: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// USD per million tokens; only used when the provider reports no cost.
    #[serde(default)]
    pub prompt_price_per_million: f64,
    #[serde(default)]
    pub completion_price_per_million: f64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            base_url: default_base_url(),
            filter_model: default_model(),
            final_model: default_model(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            prompt_price_per_million: 0.0,
            completion_price_per_million: 0.0,
            retry: RetrySettings::default(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: AiConfig = serde_json::from_str(&data)?;
        cfg.finish()
    }

    /// File if present, otherwise defaults; the API key is resolved either way.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Self::default().finish()
        }
    }

    fn finish(mut self) -> anyhow::Result<Self> {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var(ENV_API_KEY)
                .map_err(|_| anyhow::anyhow!("Missing {ENV_API_KEY} env var"))?;
        }

        // Sanitize
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout();
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout();
        }
        self.prompt_price_per_million = self.prompt_price_per_million.max(0.0);
        self.completion_price_per_million = self.completion_price_per_million.max(0.0);

        Ok(self)
    }
}
