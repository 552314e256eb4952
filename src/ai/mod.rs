//! AI completion layer: client trait, OpenRouter-compatible provider, mock.

pub mod openrouter;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{DigestError, Result};

pub use openrouter::OpenRouterClient;

/// Marker the filter prompt asks for when nothing relevant was found.
pub const NO_RELEVANT_NEWS: &str = "NO_RELEVANT_NEWS";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub result: String,
    pub tokens: u64,
    /// USD
    pub price: f64,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Fails with `DigestError::Api` on transport/provider failure.
    async fn complete(&self, system_prompt: &str, content: &str) -> Result<Completion>;

    /// Model / provider label for logs.
    fn name(&self) -> &str {
        "ai"
    }
}

pub type DynCompletionClient = Arc<dyn CompletionClient>;

/// True when a filter reply means "nothing to report": `NO_RELEVANT_NEWS`,
/// `No news`, and the like, ignoring case, surrounding punctuation and markup.
pub fn is_no_news(text: &str) -> bool {
    let plain = crate::fetch::normalize_text(text);
    let key: String = plain
        .trim_matches(|c: char| !c.is_alphanumeric())
        .chars()
        .map(|c| {
            if c.is_whitespace() || c == '-' {
                '_'
            } else {
                c.to_ascii_uppercase()
            }
        })
        .collect();
    if key.is_empty() {
        return true;
    }
    matches!(
        key.as_str(),
        NO_RELEVANT_NEWS | "NO_NEWS" | "NO_RELEVANT_NEWS_FOUND" | "NONE"
    )
}

// --- Test helper ---

type Responder = dyn Fn(&str, &str) -> Result<Completion> + Send + Sync;

/// Deterministic client; records every `(system_prompt, content)` pair.
pub struct MockClient {
    responder: Box<Responder>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockClient {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Completion> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(f),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str, tokens: u64, price: f64) -> Self {
        let text = text.to_string();
        Self::from_fn(move |_, _| {
            Ok(Completion {
                result: text.clone(),
                tokens,
                price,
            })
        })
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::from_fn(move |_, _| Err(DigestError::api(message.clone())))
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("mock mutex poisoned").clone()
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    async fn complete(&self, system_prompt: &str, content: &str) -> Result<Completion> {
        self.calls
            .lock()
            .expect("mock mutex poisoned")
            .push((system_prompt.to_string(), content.to_string()));
        (self.responder)(system_prompt, content)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_news_markers() {
        assert!(is_no_news("NO_RELEVANT_NEWS"));
        assert!(is_no_news("  No news. "));
        assert!(is_no_news("no relevant news"));
        assert!(is_no_news("<b>NO_RELEVANT_NEWS</b>"));
        assert!(is_no_news(""));
        assert!(!is_no_news("<b>A7 closed</b>\nImpact: detours"));
        assert!(!is_no_news("No news agencies reported delays, but the A1 is closed"));
    }
}
