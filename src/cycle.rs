// src/cycle.rs
//! Cycle orchestrator: window, fan-out over groups, merge, synthesis,
//! failure persistence and checkpoint advance.
//!
//! Only failures before any group is dispatched abort a cycle. Everything
//! after dispatch degrades to an empty contribution or a placeholder digest,
//! and the checkpoint is advanced once all of it has resolved.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::ai::CompletionClient;
use crate::checkpoint::CheckpointStore;
use crate::config::{DigestSettings, DEFAULT_MAX_CONCURRENT_WORKERS};
use crate::error::DigestError;
use crate::fetch::FeedFetcher;
use crate::group::{process_group, GroupOutcome};
use crate::metrics as m;
use crate::prompts;
use crate::sources::{FailureSink, SourceLoader};
use crate::window::{compute_window, TimeWindow, DEFAULT_MAX_PARSE_HOURS};

/// Collaborators of one orchestrator. All are shared with the spawned group
/// tasks, hence `Arc`.
#[derive(Clone)]
pub struct CycleDeps {
    pub sources: Arc<dyn SourceLoader>,
    pub fetcher: Arc<dyn FeedFetcher>,
    pub filter_ai: Arc<dyn CompletionClient>,
    pub final_ai: Arc<dyn CompletionClient>,
    pub checkpoint: Arc<dyn CheckpointStore>,
    pub failures: Arc<dyn FailureSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSettings {
    pub max_parse_hours: u32,
    pub max_concurrent_workers: usize,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            max_parse_hours: DEFAULT_MAX_PARSE_HOURS,
            max_concurrent_workers: DEFAULT_MAX_CONCURRENT_WORKERS,
        }
    }
}

impl From<&DigestSettings> for CycleSettings {
    fn from(s: &DigestSettings) -> Self {
        Self {
            max_parse_hours: s.max_parse_hours,
            max_concurrent_workers: s.max_concurrent_workers,
        }
    }
}

/// Aggregate of a completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub window: TimeWindow,
    /// Pre-synthesis text, `"News for: {id}:\n{report}"` blocks in group order.
    pub merged_report: String,
    /// Final digest; empty when there was nothing to synthesize.
    pub digest: String,
    pub tokens: u64,
    pub price: f64,
    pub failures: BTreeMap<String, Vec<String>>,
    pub alerts: Vec<String>,
}

/// Reasons a cycle stops before dispatching any group. The checkpoint is
/// left untouched in every case.
#[derive(Debug)]
pub enum CycleAbort {
    NoSources,
    Config(DigestError),
    Checkpoint(DigestError),
}

impl CycleAbort {
    /// Text shown to the chat user (HTML).
    pub fn user_message(&self) -> String {
        match self {
            CycleAbort::NoSources => {
                "⚠️ <b>No news sources are configured.</b>\nAdd RSS feeds to the sources file."
                    .to_string()
            }
            CycleAbort::Config(e) => format!(
                "<b>Configuration error:</b>\n<code>{}</code>",
                html_escape::encode_text(&e.to_string())
            ),
            CycleAbort::Checkpoint(e) => format!(
                "<b>Initialization error:</b>\n<code>{}</code>",
                html_escape::encode_text(&e.to_string())
            ),
        }
    }
}

/// What the caller of a cycle gets back.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutput {
    Digest(String),
    NoNews,
    Failed(String),
}

impl CycleOutput {
    fn outcome_label(&self) -> &'static str {
        match self {
            CycleOutput::Digest(_) => "digest",
            CycleOutput::NoNews => "no_news",
            CycleOutput::Failed(_) => "failed",
        }
    }
}

/// Join non-empty reports in ascending group order.
pub fn merge_reports(reports: &BTreeMap<String, String>) -> String {
    reports
        .iter()
        .filter(|(_, r)| !r.trim().is_empty())
        .map(|(id, r)| format!("News for: {id}:\n{r}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn synthesis_placeholder(err: &DigestError) -> String {
    format!(
        "⚠️ <b>Failed to generate the final digest:</b> <code>{}</code>",
        html_escape::encode_text(&err.to_string())
    )
}

pub struct CycleOrchestrator {
    deps: CycleDeps,
    settings: CycleSettings,
}

impl CycleOrchestrator {
    pub fn new(deps: CycleDeps, settings: CycleSettings) -> Self {
        Self { deps, settings }
    }

    pub fn checkpoint(&self) -> &Arc<dyn CheckpointStore> {
        &self.deps.checkpoint
    }

    pub fn sources(&self) -> &Arc<dyn SourceLoader> {
        &self.deps.sources
    }

    /// Run one cycle ending now.
    pub async fn run(&self) -> CycleOutput {
        self.run_at(Utc::now()).await
    }

    /// Run one cycle whose window ends at `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> CycleOutput {
        let t0 = Instant::now();
        let output = match self.run_cycle(now).await {
            Ok(res) if res.digest.trim().is_empty() => CycleOutput::NoNews,
            Ok(res) => CycleOutput::Digest(res.digest),
            Err(abort) => {
                error!(target: "digest", reason = ?abort, "cycle aborted before dispatch");
                CycleOutput::Failed(abort.user_message())
            }
        };
        counter!(m::CYCLES_TOTAL, "outcome" => output.outcome_label()).increment(1);
        histogram!(m::CYCLE_DURATION_MS).record(t0.elapsed().as_secs_f64() * 1_000.0);
        output
    }

    /// The full cycle, returning the aggregate for callers that want more
    /// than the digest text.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleResult, CycleAbort> {
        info!(target: "digest", "starting cycle");

        let groups = self.deps.sources.load_groups().map_err(CycleAbort::Config)?;
        if groups.is_empty() {
            error!(target: "digest", "no news sources configured, cycle finished");
            return Err(CycleAbort::NoSources);
        }

        let last = self
            .deps
            .checkpoint
            .last_run_time()
            .await
            .map_err(CycleAbort::Checkpoint)?;
        let window = compute_window(last, now, self.settings.max_parse_hours);
        info!(
            target: "digest",
            start = %window.start().to_rfc3339(),
            end = %window.end().to_rfc3339(),
            "time window"
        );

        let outcomes = self.fan_out(groups, window).await;

        let mut reports = BTreeMap::new();
        let mut failures = BTreeMap::new();
        let mut alerts = Vec::new();
        let mut tokens: u64 = 0;
        let mut price: f64 = 0.0;
        for o in outcomes {
            tokens += o.tokens;
            price += o.price;
            if !o.fetch_failures.is_empty() {
                failures.insert(o.group_id.clone(), o.fetch_failures);
            }
            alerts.extend(o.fetch_alerts);
            if !o.report.trim().is_empty() {
                reports.insert(o.group_id, o.report);
            }
        }

        let merged_report = merge_reports(&reports);
        let digest = if merged_report.is_empty() {
            String::new()
        } else {
            info!(target: "digest", groups = reports.len(), "synthesizing final digest");
            match self
                .deps
                .final_ai
                .complete(prompts::FINAL_PROMPT, &merged_report)
                .await
            {
                Ok(c) => {
                    tokens += c.tokens;
                    price += c.price;
                    info!(target: "digest", tokens = c.tokens, price = c.price, "final digest created");
                    c.result
                }
                Err(e) => {
                    error!(target: "digest", error = %e, "final digest synthesis failed");
                    synthesis_placeholder(&e)
                }
            }
        };

        info!(
            target: "digest",
            tokens,
            price = %format!("{price:.8}"),
            groups_with_news = reports.len(),
            failed_groups = failures.len(),
            alerts = alerts.len(),
            "cycle AI totals"
        );
        counter!(m::AI_TOKENS_TOTAL).increment(tokens);
        gauge!(m::AI_PRICE_USD).set(price);

        if !failures.is_empty() || !alerts.is_empty() {
            if let Err(e) = self.deps.failures.persist_failures(&failures, &alerts).await {
                error!(target: "digest", error = %e, "persisting feed failures failed");
            }
        }

        match self.deps.checkpoint.set_last_run_time(window.end()).await {
            Ok(()) => gauge!(m::LAST_RUN_TS).set(window.end().timestamp() as f64),
            Err(e) => error!(target: "digest", error = %e, "updating last run time failed"),
        }

        info!(target: "digest", "cycle finished");
        Ok(CycleResult {
            window,
            merged_report,
            digest,
            tokens,
            price,
            failures,
            alerts,
        })
    }

    /// One spawned task per group, at most `max_concurrent_workers` running.
    /// Outcomes come back in completion order; a task that cannot be joined
    /// contributes nothing.
    async fn fan_out(
        &self,
        groups: BTreeMap<String, Vec<String>>,
        window: TimeWindow,
    ) -> Vec<GroupOutcome> {
        let workers = groups
            .len()
            .min(self.settings.max_concurrent_workers)
            .max(1);
        info!(target: "digest", groups = groups.len(), workers, "dispatching groups");
        let permits = Arc::new(Semaphore::new(workers));

        let mut pending = FuturesUnordered::new();
        for (group_id, urls) in groups {
            let permits = permits.clone();
            let fetcher = self.deps.fetcher.clone();
            let ai = self.deps.filter_ai.clone();
            let id = group_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                process_group(&id, &urls, &window, fetcher.as_ref(), ai.as_ref()).await
            });
            pending.push(async move { (group_id, handle.await) });
        }

        let mut outcomes = Vec::new();
        while let Some((group_id, joined)) = pending.next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    let err = DigestError::Aggregation {
                        group: group_id,
                        reason: e.to_string(),
                    };
                    warn!(target: "digest", error = %err, "group contributes nothing");
                    counter!(m::GROUP_FAILURES_TOTAL).increment(1);
                }
            }
        }
        outcomes
    }
}
