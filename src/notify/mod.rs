// src/notify/mod.rs
//! Delivery channels for digests and status messages.

pub mod discord;
pub mod telegram;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::lock::ActivitySignal;

pub use discord::DiscordChannel;
pub use telegram::TelegramChannel;

/// Transport-specific id of a sent message, used for later deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

#[async_trait]
pub trait Channel: Send + Sync {
    /// Send `text`, chunked as the transport requires. Returns the id of the
    /// first chunk when the transport reports one.
    async fn send_message(&self, text: &str) -> Result<Option<MessageId>>;

    async fn delete_message(&self, _id: &MessageId) -> Result<()> {
        Ok(())
    }

    /// Typing indicator or equivalent.
    async fn send_typing(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

pub type DynChannel = Arc<dyn Channel>;

/// Typing indicator of a channel as the liveness signal.
pub struct TypingSignal(pub DynChannel);

#[async_trait]
impl ActivitySignal for TypingSignal {
    async fn still_working(&self) -> Result<()> {
        self.0.send_typing().await
    }
}

/// Split `text` into chunks of at most `limit` characters, preferring to cut
/// at the last newline, then the last space, inside each chunk.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let hard = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let head = &rest[..hard];
        let cut = head
            .rfind('\n')
            .or_else(|| head.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(hard);
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches(['\n', ' ']);
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Writes messages to the log. Used when no chat transport is configured.
#[derive(Default)]
pub struct LogChannel;

#[async_trait]
impl Channel for LogChannel {
    async fn send_message(&self, text: &str) -> Result<Option<MessageId>> {
        info!(target: "digest", chars = text.chars().count(), "\n{text}");
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Sends to every channel; succeeds if at least one succeeds.
///
/// The returned id is local to the fan-out and maps to the id each channel
/// assigned, so a delete reaches every channel with its own id.
pub struct FanoutChannel {
    channels: Vec<DynChannel>,
    next_id: AtomicU64,
    sent: Mutex<HashMap<MessageId, Vec<(usize, MessageId)>>>,
}

impl FanoutChannel {
    pub fn new(channels: Vec<DynChannel>) -> Self {
        Self {
            channels,
            next_id: AtomicU64::new(1),
            sent: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Channel for FanoutChannel {
    async fn send_message(&self, text: &str) -> Result<Option<MessageId>> {
        let mut ids = Vec::new();
        let mut last_err = None;
        let mut delivered = false;
        for (idx, ch) in self.channels.iter().enumerate() {
            match ch.send_message(text).await {
                Ok(id) => {
                    delivered = true;
                    ids.extend(id.map(|id| (idx, id)));
                }
                Err(e) => {
                    tracing::warn!(channel = ch.name(), error = %e, "delivery failed");
                    last_err = Some(e);
                }
            }
        }
        if let (false, Some(e)) = (delivered, last_err) {
            return Err(e);
        }
        if ids.is_empty() {
            return Ok(None);
        }
        let id = MessageId(format!(
            "fanout-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));
        if let Ok(mut sent) = self.sent.lock() {
            sent.insert(id.clone(), ids);
        }
        Ok(Some(id))
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let targets = match self.sent.lock() {
            Ok(mut sent) => sent.remove(id).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for (idx, inner) in targets {
            let Some(ch) = self.channels.get(idx) else {
                continue;
            };
            if let Err(e) = ch.delete_message(&inner).await {
                tracing::warn!(channel = ch.name(), error = %e, "delete failed");
            }
        }
        Ok(())
    }

    async fn send_typing(&self) -> Result<()> {
        for ch in &self.channels {
            if let Err(e) = ch.send_typing().await {
                tracing::debug!(channel = ch.name(), error = %e, "typing signal failed");
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}

// --- Test helper ---

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Sent(String),
    Deleted(MessageId),
    Typing,
}

/// Records everything it is asked to do.
#[derive(Default)]
pub struct MemoryChannel {
    events: Mutex<Vec<ChannelEvent>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().expect("channel mutex poisoned").clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::Sent(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn push(&self, e: ChannelEvent) -> usize {
        let mut ev = self.events.lock().expect("channel mutex poisoned");
        ev.push(e);
        ev.len()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send_message(&self, text: &str) -> Result<Option<MessageId>> {
        let n = self.push(ChannelEvent::Sent(text.to_string()));
        Ok(Some(MessageId(n.to_string())))
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        self.push(ChannelEvent::Deleted(id.clone()));
        Ok(())
    }

    async fn send_typing(&self) -> Result<()> {
        self.push(ChannelEvent::Typing);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
