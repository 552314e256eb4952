// src/notify/telegram.rs
//! Telegram Bot API channel (HTML parse mode).

use std::time::Duration;

use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{split_message, Channel, MessageId};
use crate::error::{DigestError, Result};

pub const TELEGRAM_MAX_LEN: usize = 4000;
const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramChannel {
    api_base: String,
    token: String,
    chat_id: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
    chunk_pause: Duration,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

impl TelegramChannel {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            chat_id,
            client: Client::new(),
            timeout: Duration::from_secs(15),
            max_retries: 3,
            chunk_pause: Duration::from_millis(500),
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// POST with the webhook-style retry: 500ms, 1s, 2s, ...
    async fn call<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> AnyResult<ApiResponse> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(self.url(method))
                .timeout(self.timeout)
                .json(body)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    match rsp.json::<ApiResponse>().await {
                        Ok(parsed) if parsed.ok => return Ok(parsed),
                        Ok(parsed) => {
                            let msg = parsed.description.unwrap_or_default();
                            // 4xx other than 429 will not get better on retry
                            if status.is_client_error() && status.as_u16() != 429 {
                                return Err(anyhow!(
                                    "Telegram {method} rejected ({status}): {msg}"
                                ));
                            }
                            anyhow!("Telegram {method} HTTP error ({status}): {msg}")
                        }
                        Err(e) => anyhow!("Telegram {method} unreadable response ({status}): {e}"),
                    }
                }
                Err(e) => anyhow!("Telegram {method} request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

fn delivery(e: anyhow::Error) -> DigestError {
    DigestError::Delivery(format!("{e:#}"))
}

#[async_trait]
impl Channel for TelegramChannel {
    async fn send_message(&self, text: &str) -> Result<Option<MessageId>> {
        let chunks = split_message(text, TELEGRAM_MAX_LEN);
        let many = chunks.len() > 1;
        let mut first = None;

        for part in chunks.iter().filter(|c| !c.trim().is_empty()) {
            let body = SendMessage {
                chat_id: &self.chat_id,
                text: part,
                parse_mode: "HTML",
                disable_web_page_preview: true,
            };
            let resp = self.call("sendMessage", &body).await.map_err(delivery)?;
            if first.is_none() {
                first = resp
                    .result
                    .as_ref()
                    .and_then(|r| r.get("message_id"))
                    .and_then(|v| v.as_i64())
                    .map(|id| MessageId(id.to_string()));
            }
            if many {
                tokio::time::sleep(self.chunk_pause).await;
            }
        }
        debug!(chunks = chunks.len(), "telegram message sent");
        Ok(first)
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let message_id: i64 = id
            .0
            .parse()
            .map_err(|_| DigestError::Delivery(format!("bad telegram message id {}", id.0)))?;
        self.call(
            "deleteMessage",
            &json!({ "chat_id": self.chat_id, "message_id": message_id }),
        )
        .await
        .map(|_| ())
        .map_err(delivery)
    }

    async fn send_typing(&self) -> Result<()> {
        self.call(
            "sendChatAction",
            &json!({ "chat_id": self.chat_id, "action": "typing" }),
        )
        .await
        .map(|_| ())
        .map_err(delivery)
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_urls_embed_token() {
        let ch = TelegramChannel::new("123:abc".into(), "-100".into())
            .with_api_base("http://localhost:8081/");
        assert_eq!(
            ch.url("sendMessage"),
            "http://localhost:8081/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn send_payload_uses_html_mode() {
        let body = SendMessage {
            chat_id: "-100",
            text: "<b>hi</b>",
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["parse_mode"], "HTML");
        assert_eq!(v["chat_id"], "-100");
    }

    #[tokio::test]
    async fn bad_message_id_is_delivery_error() {
        let ch = TelegramChannel::new("t".into(), "c".into());
        let err = ch.delete_message(&MessageId("abc".into())).await.unwrap_err();
        assert!(matches!(err, DigestError::Delivery(_)));
    }
}
