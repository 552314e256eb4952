// src/sources.rs
//! Feed groups, run schedule and failure persistence.
//!
//! The sources file is TOML or JSON:
//!
//! ```toml
//! schedule = ["06:00", "18:30"]
//!
//! [groups]
//! DE = ["https://example.de/rss", "https://example.de/verkehr.xml"]
//! FR = ["https://example.fr/rss"]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DigestError, Result};

/// group id → ordered, per-group unique source URLs.
pub type FeedGroups = BTreeMap<String, Vec<String>>;

pub trait SourceLoader: Send + Sync {
    /// Fresh read every cycle. Empty map means "no sources configured".
    fn load_groups(&self) -> Result<FeedGroups>;

    /// Daily run times (UTC). Missing schedule is not an error.
    fn load_schedule(&self) -> Result<Vec<NaiveTime>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    schedule: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FileSourceLoader {
    path: PathBuf,
}

impl FileSourceLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> anyhow::Result<SourcesFile> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading sources from {}", self.path.display()))?;
        let ext = self
            .path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_sources(&content, &ext)
    }
}

impl SourceLoader for FileSourceLoader {
    fn load_groups(&self) -> Result<FeedGroups> {
        let file = self
            .read_file()
            .map_err(|e| DigestError::Config(format!("{e:#}")))?;
        let groups = clean_groups(file.groups);
        if groups.is_empty() {
            warn!(path = %self.path.display(), "no feed sources found in config");
        } else {
            info!(groups = ?groups.keys().collect::<Vec<_>>(), "feed sources loaded");
        }
        Ok(groups)
    }

    fn load_schedule(&self) -> Result<Vec<NaiveTime>> {
        let file = self
            .read_file()
            .map_err(|e| DigestError::Config(format!("{e:#}")))?;
        let times = parse_schedule(&file.schedule);
        if times.is_empty() {
            info!("no valid scheduled run times configured");
        } else {
            info!(times = ?times.iter().map(format_hhmm).collect::<Vec<_>>(), "schedule loaded (UTC)");
        }
        Ok(times)
    }
}

fn parse_sources(s: &str, hint_ext: &str) -> anyhow::Result<SourcesFile> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing sources json");
    }
    match toml::from_str::<SourcesFile>(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported sources format: {toml_err}")),
    }
}

/// Trim ids and URLs, drop blanks, de-duplicate URLs within a group
/// (first occurrence wins), drop groups left without URLs.
pub fn clean_groups(raw: BTreeMap<String, Vec<String>>) -> FeedGroups {
    let mut out = FeedGroups::new();
    for (id, urls) in raw {
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        let mut seen = HashSet::new();
        let urls: Vec<String> = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty() && seen.insert(u.to_string()))
            .map(str::to_string)
            .collect();
        if !urls.is_empty() {
            out.entry(id.to_string()).or_default().extend(urls);
        }
    }
    out
}

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)(?::[0-5]\d)?$").expect("static schedule regex")
});

/// Accepts `HH:MM` or `HH:MM:SS`; seconds are dropped. Invalid entries are
/// logged and skipped. Result is sorted and de-duplicated.
pub fn parse_schedule(entries: &[String]) -> Vec<NaiveTime> {
    let mut times: Vec<NaiveTime> = Vec::new();
    for raw in entries {
        let s = raw.trim();
        let parsed = TIME_RE.captures(s).and_then(|c| {
            let h = c[1].parse().ok()?;
            let m = c[2].parse().ok()?;
            NaiveTime::from_hms_opt(h, m, 0)
        });
        match parsed {
            Some(t) => times.push(t),
            None => warn!(entry = s, "invalid schedule time, expected HH:MM or HH:MM:SS"),
        }
    }
    times.sort();
    times.dedup();
    times
}

pub fn format_hhmm(t: &NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

// ------------------------------------------------------------
// Failure sink
// ------------------------------------------------------------

#[async_trait]
pub trait FailureSink: Send + Sync {
    /// Best-effort; callers log errors and carry on.
    async fn persist_failures(
        &self,
        failures: &BTreeMap<String, Vec<String>>,
        alerts: &[String],
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TemporaryFailure,
    DisabledFeed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub group: Option<String>,
    pub detail: String,
    pub recorded_at: chrono::DateTime<Utc>,
}

/// Appends one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlFailureSink {
    path: PathBuf,
}

impl JsonlFailureSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, records: &[FailureRecord]) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        for r in records {
            let line = serde_json::to_string(r)?;
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Flatten per-group failures and alerts into records stamped `now`.
pub fn failure_records(
    failures: &BTreeMap<String, Vec<String>>,
    alerts: &[String],
) -> Vec<FailureRecord> {
    let now = Utc::now();
    let mut out = Vec::new();
    for (group, items) in failures {
        for detail in items {
            out.push(FailureRecord {
                kind: FailureKind::TemporaryFailure,
                group: Some(group.clone()),
                detail: detail.clone(),
                recorded_at: now,
            });
        }
    }
    for alert in alerts {
        out.push(FailureRecord {
            kind: FailureKind::DisabledFeed,
            group: None,
            detail: alert.clone(),
            recorded_at: now,
        });
    }
    out
}

#[async_trait]
impl FailureSink for JsonlFailureSink {
    async fn persist_failures(
        &self,
        failures: &BTreeMap<String, Vec<String>>,
        alerts: &[String],
    ) -> Result<()> {
        let records = failure_records(failures, alerts);
        let this = self.clone();
        let n = records.len();
        tokio::task::spawn_blocking(move || this.append(&records))
            .await
            .map_err(|e| DigestError::Persist(e.to_string()))?
            .map_err(|e| DigestError::Persist(format!("{e:#}")))?;
        info!(records = n, path = %self.path.display(), "feed failures persisted");
        Ok(())
    }
}

// --- Test helper ---
#[derive(Default)]
pub struct MemoryFailureSink {
    pub calls: Mutex<Vec<(BTreeMap<String, Vec<String>>, Vec<String>)>>,
    pub fail: bool,
}

impl MemoryFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl FailureSink for MemoryFailureSink {
    async fn persist_failures(
        &self,
        failures: &BTreeMap<String, Vec<String>>,
        alerts: &[String],
    ) -> Result<()> {
        self.calls
            .lock()
            .expect("sink mutex poisoned")
            .push((failures.clone(), alerts.to_vec()));
        if self.fail {
            return Err(DigestError::Persist("sink unavailable".into()));
        }
        Ok(())
    }
}

/// Fixed groups, for tests and one-shot runs.
pub struct StaticSourceLoader {
    groups: Result<FeedGroups>,
}

impl StaticSourceLoader {
    pub fn new(groups: FeedGroups) -> Self {
        Self { groups: Ok(groups) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            groups: Err(DigestError::Config(message.to_string())),
        }
    }
}

impl SourceLoader for StaticSourceLoader {
    fn load_groups(&self) -> Result<FeedGroups> {
        match &self.groups {
            Ok(g) => Ok(g.clone()),
            Err(e) => Err(DigestError::Config(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_and_json_parse_to_same_groups() {
        let toml = r#"
schedule = ["06:00"]
[groups]
DE = ["https://a.de/rss", " https://a.de/rss ", "", "https://b.de/rss"]
" " = ["https://ignored"]
FR = []
"#;
        let json = r#"{"groups": {"DE": ["https://a.de/rss", "https://b.de/rss"]}}"#;
        let t = clean_groups(parse_sources(toml, "toml").unwrap().groups);
        let j = clean_groups(parse_sources(json, "json").unwrap().groups);
        assert_eq!(t, j);
        assert_eq!(t["DE"], vec!["https://a.de/rss", "https://b.de/rss"]);
        assert!(!t.contains_key("FR"));
    }

    #[test]
    fn same_url_allowed_in_two_groups() {
        let mut raw = BTreeMap::new();
        raw.insert("AT".to_string(), vec!["https://x/rss".to_string()]);
        raw.insert("DE".to_string(), vec!["https://x/rss".to_string()]);
        let g = clean_groups(raw);
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn schedule_validation_sorts_and_dedups() {
        let raw: Vec<String> = ["18:30", "06:00:45", "06:00", "24:00", "7:5", "nonsense"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let times = parse_schedule(&raw);
        let shown: Vec<String> = times.iter().map(format_hhmm).collect();
        assert_eq!(shown, vec!["06:00", "18:30"]);
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let loader = FileSourceLoader::new("/definitely/missing/sources.toml");
        assert!(matches!(loader.load_groups(), Err(DigestError::Config(_))));
    }

    #[tokio::test]
    async fn jsonl_sink_appends_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state/feed_failures.jsonl");
        let sink = JsonlFailureSink::new(&path);
        let mut failures = BTreeMap::new();
        failures.insert("DE".to_string(), vec!["https://a.de/rss: 503".to_string()]);
        let alerts = vec!["Country: DE\nURL: https://b.de/rss\nReason: 404".to_string()];

        sink.persist_failures(&failures, &alerts).await.unwrap();
        sink.persist_failures(&failures, &[]).await.unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<FailureRecord> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].kind, FailureKind::DisabledFeed);
        assert_eq!(lines[0].group.as_deref(), Some("DE"));
    }
}
