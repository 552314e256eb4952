use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const CYCLES_TOTAL: &str = "digest_cycles_total";
pub const TRIGGERS_REJECTED_TOTAL: &str = "digest_triggers_rejected_total";
pub const GROUP_FAILURES_TOTAL: &str = "digest_group_failures_total";
pub const AI_TOKENS_TOTAL: &str = "digest_ai_tokens_total";
pub const AI_PRICE_USD: &str = "digest_ai_price_usd";
pub const CYCLE_DURATION_MS: &str = "digest_cycle_duration_ms";
pub const LAST_RUN_TS: &str = "digest_last_run_ts";
pub const FETCH_PARSE_MS: &str = "digest_fetch_parse_ms";
pub const FETCH_SOURCE_ERRORS_TOTAL: &str = "digest_fetch_source_errors_total";
pub const FETCH_ITEMS_TOTAL: &str = "digest_fetch_items_total";

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process and describe the
    /// digest series. Later calls reuse the installed handle.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE.get_or_try_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
            describe();
            Ok::<_, anyhow::Error>(handle)
        })?;
        Ok(Self {
            handle: handle.clone(),
        })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!(CYCLES_TOTAL, "Completed cycles by outcome (digest, no_news, failed)");
    describe_counter!(TRIGGERS_REJECTED_TOTAL, "Triggers rejected because a cycle was running");
    describe_counter!(GROUP_FAILURES_TOTAL, "Group tasks that could not be collected");
    describe_counter!(AI_TOKENS_TOTAL, "Tokens consumed by AI calls");
    describe_gauge!(AI_PRICE_USD, "AI cost of the last cycle in USD");
    describe_histogram!(CYCLE_DURATION_MS, Unit::Milliseconds, "Cycle wall time");
    describe_gauge!(LAST_RUN_TS, Unit::Seconds, "Unix time of the last checkpoint advance");
    describe_histogram!(FETCH_PARSE_MS, Unit::Milliseconds, "RSS document parse time");
    describe_counter!(FETCH_SOURCE_ERRORS_TOTAL, "Feed sources that failed after retries");
    describe_counter!(FETCH_ITEMS_TOTAL, "Feed items kept after window and duplicate filtering");
}
