// src/fetch/mod.rs
pub mod rss;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::{DigestError, Result};
use crate::window::TimeWindow;

pub use rss::RssFetcher;

/// What one group's fetch produced. `failures` and `alerts` are
/// human-readable diagnostics, opaque to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    pub text: String,
    pub failures: Vec<String>,
    pub alerts: Vec<String>,
}

impl FetchReport {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Must be safe to call concurrently for different groups.
    async fn fetch(
        &self,
        group_id: &str,
        sources: &[String],
        window: &TimeWindow,
    ) -> Result<FetchReport>;
}

fn tag_re() -> &'static Regex {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").unwrap())
}

/// Remove markup tags, keeping text and line breaks as they are.
pub fn strip_tags(s: &str) -> String {
    tag_re().replace_all(s, "").to_string()
}

/// Normalize text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();
    out = tag_re().replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

// --- Test helper ---

/// Canned per-group responses with optional delays.
#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, std::result::Result<FetchReport, String>>,
    delays: HashMap<String, Duration>,
    calls: std::sync::Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(mut self, group: &str, report: FetchReport) -> Self {
        self.responses.insert(group.to_string(), Ok(report));
        self
    }

    pub fn with_text(self, group: &str, text: &str) -> Self {
        self.with_report(group, FetchReport::text(text))
    }

    pub fn with_error(mut self, group: &str, message: &str) -> Self {
        self.responses
            .insert(group.to_string(), Err(message.to_string()));
        self
    }

    pub fn with_delay(mut self, group: &str, delay: Duration) -> Self {
        self.delays.insert(group.to_string(), delay);
        self
    }

    /// Group ids in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock mutex poisoned").clone()
    }
}

#[async_trait]
impl FeedFetcher for MockFetcher {
    async fn fetch(
        &self,
        group_id: &str,
        _sources: &[String],
        _window: &TimeWindow,
    ) -> Result<FetchReport> {
        self.calls
            .lock()
            .expect("mock mutex poisoned")
            .push(group_id.to_string());
        if let Some(d) = self.delays.get(group_id) {
            tokio::time::sleep(*d).await;
        }
        match self.responses.get(group_id) {
            Some(Ok(r)) => Ok(r.clone()),
            Some(Err(msg)) => Err(DigestError::Fetch {
                url: group_id.to_string(),
                reason: msg.clone(),
            }),
            None => Ok(FetchReport::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_collapses_ws() {
        let s = "  <p>Strike&nbsp;&nbsp; at <b>port</b></p>\n\n of Hamburg ";
        assert_eq!(normalize_text(s), "Strike at port of Hamburg");
    }

    #[test]
    fn strip_tags_keeps_line_breaks() {
        assert_eq!(strip_tags("<b>DE</b>\n<a href=\"x\">A7</a> < 5"), "DE\nA7 < 5");
    }

    #[test]
    fn normalize_text_caps_length() {
        let long = "a".repeat(2000);
        assert_eq!(normalize_text(&long).chars().count(), 1500);
    }
}
