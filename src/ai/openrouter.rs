//! OpenRouter (OpenAI-compatible) chat completions provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completion, CompletionClient};
use crate::config::ai::AiConfig;
use crate::error::{DigestError, Result};
use crate::retry::{retry_with_backoff, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct UsageOpt {
    include: bool,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    usage: UsageOpt,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    cost: Option<f64>,
}

/// USD per million tokens, used when the provider does not report a cost.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenPrices {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    prices: TokenPrices,
    retry: RetryPolicy,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_timeouts(api_key, model, Duration::from_secs(10), Duration::from_secs(120))
    }

    pub fn with_timeouts(
        api_key: impl Into<String>,
        model: impl Into<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("news-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            prices: TokenPrices::default(),
            retry: RetryPolicy::default(),
        })
    }

    /// Build the client for `model` from the AI config section.
    pub fn from_config(cfg: &AiConfig, model: &str) -> anyhow::Result<Self> {
        let client = Self::with_timeouts(
            cfg.api_key.clone(),
            model,
            Duration::from_secs(cfg.connect_timeout_secs),
            Duration::from_secs(cfg.request_timeout_secs),
        )?
        .with_base_url(&cfg.base_url)
        .with_prices(TokenPrices {
            prompt_per_million: cfg.prompt_price_per_million,
            completion_per_million: cfg.completion_price_per_million,
        })
        .with_retry(cfg.retry.policy());
        Ok(client)
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_prices(mut self, prices: TokenPrices) -> Self {
        self.prices = prices;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn price_for(&self, usage: &Usage) -> f64 {
        usage.cost.unwrap_or_else(|| {
            (usage.prompt_tokens as f64 * self.prices.prompt_per_million
                + usage.completion_tokens as f64 * self.prices.completion_per_million)
                / 1_000_000.0
        })
    }

    async fn request_once(&self, system_prompt: &str, content: &str) -> Result<Completion> {
        if self.api_key.is_empty() {
            return Err(DigestError::api_fatal("missing API key"));
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system_prompt,
                },
                Msg {
                    role: "user",
                    content,
                },
            ],
            temperature: 0.2,
            usage: UsageOpt { include: true },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| DigestError::from_reqwest(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.chars().take(300).collect();
            return Err(DigestError::from_status(status.as_u16(), body));
        }

        let body: Resp = resp.json().await.map_err(|e| DigestError::from_reqwest(&e))?;
        let usage = body.usage.unwrap_or_default();
        let result = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DigestError::api("response contained no choices"))?;

        let tokens = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };
        let price = self.price_for(&usage);
        debug!(model = %self.model, tokens, price, "completion received");

        Ok(Completion {
            result: result.trim().to_string(),
            tokens,
            price,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn complete(&self, system_prompt: &str, content: &str) -> Result<Completion> {
        retry_with_backoff(&self.retry, "ai_completion", move || {
            self.request_once(system_prompt, content)
        })
        .await
    }

    fn name(&self) -> &str {
        &self.model
    }
}
