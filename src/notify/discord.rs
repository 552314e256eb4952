use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{split_message, Channel, MessageId};
use crate::error::{DigestError, Result};

/// Discord rejects `content` longer than this.
pub const DISCORD_MAX_LEN: usize = 2000;

#[derive(Clone)]
pub struct DiscordChannel {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordChannel {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn post(&self, payload: &DiscordWebhookPayload) -> AnyResult<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("Discord webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Discord webhook request failed: {e}"));
                }
            }
        }
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    async fn send_message(&self, text: &str) -> Result<Option<MessageId>> {
        let plain = html_to_markdown(text);
        for part in split_message(&plain, DISCORD_MAX_LEN) {
            let payload = DiscordWebhookPayload::content(&part);
            self.post(&payload)
                .await
                .map_err(|e| DigestError::Delivery(format!("{e:#}")))?;
        }
        // Webhooks do not return a message id unless `?wait=true`.
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

/// Digests are written for Telegram HTML; map the few tags used to Markdown.
fn html_to_markdown(s: &str) -> String {
    let s = s
        .replace("<b>", "**")
        .replace("</b>", "**")
        .replace("<i>", "*")
        .replace("</i>", "*")
        .replace("<code>", "`")
        .replace("</code>", "`");
    html_escape::decode_html_entities(&crate::fetch::strip_tags(&s)).to_string()
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: String,
}

impl DiscordWebhookPayload {
    fn content(text: &str) -> Self {
        Self {
            content: text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_tags_become_markdown() {
        let md = html_to_markdown("<b>DE</b>\n<a href=\"https://x\">A7</a> closed &amp; <i>slow</i>");
        assert_eq!(md, "**DE**\nA7 closed & *slow*");
    }

    #[test]
    fn payload_shape() {
        let v = serde_json::to_value(DiscordWebhookPayload::content("hi")).unwrap();
        assert_eq!(v, serde_json::json!({"content": "hi"}));
    }
}
