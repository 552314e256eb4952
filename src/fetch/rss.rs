use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{normalize_text, FeedFetcher, FetchReport};
use crate::error::Result;
use crate::metrics as m;
use crate::retry::{retry_with_backoff, RetryPolicy, Retryable};
use crate::window::TimeWindow;

const NEAR_DUPLICATE_SIMILARITY: f64 = 0.92;
pub const DEFAULT_DISABLE_AFTER: u32 = 5;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// One parsed feed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub summary: String,
    pub link: Option<String>,
    pub published: DateTime<Utc>,
}

#[derive(Debug)]
struct SourceError {
    reason: String,
    retryable: bool,
    timeout: bool,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
    fn is_timeout(&self) -> bool {
        self.timeout
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        let retryable = e.is_timeout()
            || e.is_connect()
            || e
                .status()
                .map(|s| s.as_u16() == 429 || s.is_server_error())
                .unwrap_or(true);
        Self {
            reason: e.to_string(),
            retryable,
            timeout: e.is_timeout(),
        }
    }
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(ts.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// Parse an RSS 2.0 document. Items without a parseable `pubDate` are dropped
/// since they cannot be placed in a window.
pub fn parse_feed(xml: &str) -> anyhow::Result<Vec<FeedItem>> {
    let t0 = std::time::Instant::now();
    let rss: Rss = from_str(&scrub_html_entities_for_xml(xml))?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        let summary = normalize_text(it.description.as_deref().unwrap_or_default());
        if title.is_empty() && summary.is_empty() {
            continue;
        }
        let Some(published) = it.pub_date.as_deref().and_then(parse_rfc2822) else {
            debug!(title = %title, "skipping item without valid pubDate");
            continue;
        };
        out.push(FeedItem {
            title,
            summary,
            link: it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            published,
        });
    }

    histogram!(m::FETCH_PARSE_MS).record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

/// Keep items inside the window, then drop exact (hash) and near-duplicate
/// titles. Order follows publication time.
pub fn select_items(mut items: Vec<FeedItem>, window: &TimeWindow) -> Vec<FeedItem> {
    items.retain(|it| window.contains(it.published));
    items.sort_by_key(|it| it.published);

    let mut hashes = HashSet::new();
    let mut kept: Vec<FeedItem> = Vec::with_capacity(items.len());
    for it in items {
        let key = it.title.to_lowercase();
        let digest = Sha256::digest(key.as_bytes());
        if !hashes.insert(digest) {
            continue;
        }
        let near_dup = !key.is_empty()
            && kept.iter().any(|k| {
                strsim::normalized_levenshtein(&k.title.to_lowercase(), &key)
                    >= NEAR_DUPLICATE_SIMILARITY
            });
        if near_dup {
            continue;
        }
        kept.push(it);
    }
    kept
}

/// Text block handed to the AI filter.
pub fn render_items(items: &[FeedItem]) -> String {
    items
        .iter()
        .map(|it| {
            let mut block = format!(
                "Title: {}\nPublished: {}",
                it.title,
                it.published.to_rfc3339()
            );
            if !it.summary.is_empty() {
                block.push_str("\nSummary: ");
                block.push_str(&it.summary);
            }
            if let Some(link) = &it.link {
                block.push_str("\nLink: ");
                block.push_str(link);
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Default)]
struct SourceHealth {
    consecutive_failures: HashMap<String, u32>,
    disabled: HashSet<String>,
}

/// HTTP RSS fetcher. Sources that fail `disable_after` times in a row raise
/// an alert and are skipped for the rest of the process lifetime.
pub struct RssFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    disable_after: u32,
    health: Mutex<SourceHealth>,
}

impl RssFetcher {
    pub fn new(retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("news-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            retry,
            disable_after: DEFAULT_DISABLE_AFTER,
            health: Mutex::new(SourceHealth::default()),
        })
    }

    pub fn with_disable_after(mut self, n: u32) -> Self {
        self.disable_after = n.max(1);
        self
    }

    async fn fetch_source(&self, url: &str) -> std::result::Result<Vec<FeedItem>, SourceError> {
        let client = &self.client;
        let body = retry_with_backoff(&self.retry, "rss_fetch", move || async move {
            let resp = client.get(url).send().await?.error_for_status()?;
            Ok::<_, SourceError>(resp.text().await?)
        })
        .await?;
        parse_feed(&body).map_err(|e| SourceError {
            reason: format!("parse error: {e}"),
            retryable: false,
            timeout: false,
        })
    }

    fn is_disabled(&self, url: &str) -> bool {
        self.health
            .lock()
            .map(|h| h.disabled.contains(url))
            .unwrap_or(false)
    }

    /// Returns the failure string and, when the source just got disabled, an alert.
    fn record_failure(&self, group: &str, url: &str, reason: &str) -> (String, Option<String>) {
        let mut h = match self.health.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        let n = {
            let c = h.consecutive_failures.entry(url.to_string()).or_insert(0);
            *c += 1;
            *c
        };
        let failure = format!("{url}: {reason} (failure #{n})");
        let alert = if n >= self.disable_after && h.disabled.insert(url.to_string()) {
            warn!(group, url, failures = n, "disabling feed after repeated failures");
            Some(format!("Country: {group}\nURL: {url}\nReason: {reason}"))
        } else {
            None
        };
        (failure, alert)
    }

    fn record_success(&self, url: &str) {
        if let Ok(mut h) = self.health.lock() {
            h.consecutive_failures.remove(url);
        }
    }
}

#[async_trait]
impl FeedFetcher for RssFetcher {
    async fn fetch(
        &self,
        group_id: &str,
        sources: &[String],
        window: &TimeWindow,
    ) -> Result<FetchReport> {
        let active: Vec<&String> = sources.iter().filter(|u| !self.is_disabled(u)).collect();
        if active.len() < sources.len() {
            debug!(
                group = group_id,
                skipped = sources.len() - active.len(),
                "skipping disabled feeds"
            );
        }

        let results = join_all(active.iter().map(move |url| async move {
            (url.as_str(), self.fetch_source(url).await)
        }))
        .await;

        let mut report = FetchReport::default();
        let mut items = Vec::new();
        for (url, res) in results {
            match res {
                Ok(mut v) => {
                    self.record_success(url);
                    items.append(&mut v);
                }
                Err(e) => {
                    counter!(m::FETCH_SOURCE_ERRORS_TOTAL).increment(1);
                    let (failure, alert) = self.record_failure(group_id, url, &e.reason);
                    report.failures.push(failure);
                    report.alerts.extend(alert);
                }
            }
        }

        let selected = select_items(items, window);
        counter!(m::FETCH_ITEMS_TOTAL).increment(selected.len() as u64);
        info!(
            group = group_id,
            sources = active.len(),
            items = selected.len(),
            failures = report.failures.len(),
            "feeds fetched"
        );
        report.text = render_items(&selected);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
<item><title>Highway A7 closed near Hamburg</title><link>https://n.de/1</link>
<pubDate>Mon, 10 Mar 2025 10:30:00 +0000</pubDate><description>Full closure&nbsp;until Friday.</description></item>
<item><title>Highway A7 closed near Hamburg!</title><link>https://n.de/2</link>
<pubDate>Mon, 10 Mar 2025 10:45:00 +0000</pubDate><description>dup</description></item>
<item><title>Old news</title><pubDate>Sun, 09 Mar 2025 10:00:00 +0000</pubDate></item>
<item><title>Undated</title></item>
</channel></rss>"#;

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn parse_drops_undated_items() {
        let items = parse_feed(FEED).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].summary, "Full closure until Friday.");
    }

    #[test]
    fn pub_date_offsets_are_normalized_to_utc() {
        assert_eq!(
            parse_rfc2822(" Mon, 10 Mar 2025 12:30:00 +0200 "),
            Some(Utc.with_ymd_and_hms(2025, 3, 10, 10, 30, 0).unwrap())
        );
        assert_eq!(
            parse_rfc2822("Mon, 10 Mar 2025 10:30:00 GMT"),
            Some(Utc.with_ymd_and_hms(2025, 3, 10, 10, 30, 0).unwrap())
        );
        assert_eq!(parse_rfc2822("2025-03-10T10:30:00Z"), None);
    }

    #[test]
    fn select_filters_window_and_near_duplicates() {
        let items = select_items(parse_feed(FEED).unwrap(), &window());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link.as_deref(), Some("https://n.de/1"));
    }

    #[test]
    fn render_includes_link_and_summary() {
        let items = select_items(parse_feed(FEED).unwrap(), &window());
        let text = render_items(&items);
        assert!(text.starts_with("Title: Highway A7 closed near Hamburg"));
        assert!(text.contains("Link: https://n.de/1"));
        assert!(text.contains("Summary: Full closure until Friday."));
    }

    #[test]
    fn repeated_failures_raise_one_alert() {
        let f = RssFetcher::new(RetryPolicy::no_retry())
            .unwrap()
            .with_disable_after(2);
        let (_, a1) = f.record_failure("DE", "https://x/rss", "503");
        let (fail2, a2) = f.record_failure("DE", "https://x/rss", "503");
        let (_, a3) = f.record_failure("DE", "https://x/rss", "503");
        assert!(a1.is_none());
        assert!(fail2.ends_with("(failure #2)"));
        assert!(a2.unwrap().contains("URL: https://x/rss"));
        assert!(a3.is_none());
        assert!(f.is_disabled("https://x/rss"));
    }
}
