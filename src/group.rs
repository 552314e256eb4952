// src/group.rs
//! One group's fetch + filter pass.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::ai::{is_no_news, CompletionClient};
use crate::fetch::FeedFetcher;
use crate::prompts;
use crate::window::TimeWindow;

/// Result of processing one group. An empty `report` means nothing to say,
/// whether because the feeds were empty, the AI reported no news, or a
/// collaborator failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupOutcome {
    pub group_id: String,
    pub report: String,
    pub tokens: u64,
    pub price: f64,
    pub fetch_failures: Vec<String>,
    pub fetch_alerts: Vec<String>,
}

impl GroupOutcome {
    fn empty(group_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            ..Default::default()
        }
    }
}

/// Fetch a group's feeds, then run the filter pass over them.
///
/// Never fails: a fetch error yields an empty outcome, an AI error keeps the
/// fetch diagnostics but drops the report.
pub async fn process_group(
    group_id: &str,
    sources: &[String],
    window: &TimeWindow,
    fetcher: &dyn FeedFetcher,
    ai: &dyn CompletionClient,
) -> GroupOutcome {
    info!(group = %group_id, sources = sources.len(), "processing group");

    let fetched = match fetcher.fetch(group_id, sources, window).await {
        Ok(r) => r,
        Err(e) => {
            error!(group = %group_id, error = %e, "feed fetch failed");
            return GroupOutcome::empty(group_id);
        }
    };

    let mut outcome = GroupOutcome {
        group_id: group_id.to_string(),
        fetch_failures: fetched.failures,
        fetch_alerts: fetched.alerts,
        ..Default::default()
    };

    if fetched.text.trim().is_empty() {
        debug!(group = %group_id, "no items in window");
        return outcome;
    }

    let input = prompts::filter_input(group_id, &fetched.text);
    match ai.complete(&prompts::filter_prompt(), &input).await {
        Ok(c) => {
            outcome.tokens = c.tokens;
            outcome.price = c.price;
            if is_no_news(&c.result) {
                debug!(group = %group_id, "filter found nothing relevant");
            } else {
                outcome.report = c.result;
            }
        }
        Err(e) => {
            warn!(group = %group_id, model = ai.name(), error = %e, "filter pass failed");
        }
    }

    info!(
        group = %group_id,
        tokens = outcome.tokens,
        price = outcome.price,
        has_report = !outcome.report.is_empty(),
        "group done"
    );
    outcome
}
